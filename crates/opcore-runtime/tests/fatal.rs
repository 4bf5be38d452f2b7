mod common;

use std::process::Command;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::Locker;
use opcore_pool::{DedicatedPool, PoolConfig};
use opcore_runtime::{AsyncLock, AsyncOperation};
use parking_lot::Mutex;

const CHILD_ENV: &str = "OPCORE_VIOLATION_CHILD";
const TEST_NAME: &str = "violation_on_a_worker_thread_ends_the_process";

/// Completes while holding a lock, on a worker thread, with default options.
/// Exits cleanly only if the process outlives the violation.
fn complete_holding_a_lock() -> ! {
    let pool = Arc::new(DedicatedPool::new(PoolConfig::new(2)).unwrap());
    let lock = AsyncLock::named("held");
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut locker = Locker::new(&lock, &log);
    locker.complete_on_grant = true;
    let op = AsyncOperation::new(locker, pool);
    op.start(None, None, None);

    thread::sleep(Duration::from_secs(3));
    println!(
        "survived: lifecycle={} dispatcher={:?} locked={}",
        op.lifecycle_state(),
        op.dispatcher_state(),
        lock.is_locked()
    );
    std::process::exit(0);
}

#[test]
fn violation_on_a_worker_thread_ends_the_process() -> anyhow::Result<()> {
    if std::env::var_os(CHILD_ENV).is_some() {
        complete_holding_a_lock();
    }

    let output = Command::new(std::env::current_exe()?)
        .args(["--exact", TEST_NAME, "--nocapture", "--test-threads=1"])
        .env(CHILD_ENV, "1")
        .output()?;
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(
        !output.status.success(),
        "violation did not stop the process: {stdout}"
    );
    assert!(!stdout.contains("survived"));
    Ok(())
}
