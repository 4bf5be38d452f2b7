mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use common::Immediate;
use opcore_pool::{DedicatedPool, PoolConfig};
use opcore_protocol::{LifecycleState, ResultCode};
use opcore_runtime::{AsyncLock, AsyncOperation, Operation, OperationContext};

/// Counts threads currently inside one instance's derivation code.
#[derive(Clone, Default)]
struct Occupancy {
    inside: Arc<AtomicUsize>,
    overlaps: Arc<AtomicUsize>,
}

impl Occupancy {
    fn enter(&self) {
        if self.inside.fetch_add(1, Ordering::SeqCst) != 0 {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        thread::sleep(Duration::from_micros(200));
    }

    fn leave(&self) {
        self.inside.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Busy {
    children: Vec<AsyncOperation<Immediate>>,
    occupancy: Occupancy,
    lock: AsyncLock,
}

impl Operation for Busy {
    fn on_start(&mut self, ctx: &mut OperationContext<'_, Self>) {
        self.occupancy.enter();
        for child in &self.children {
            ctx.start_child(child, |me, ctx, _child| {
                me.occupancy.enter();
                assert!(ctx.is_in_apartment());
                me.occupancy.leave();
            });
        }
        let lock = self.lock.clone();
        ctx.acquire_lock(&lock, |me, ctx, acquired, lock| {
            me.occupancy.enter();
            if acquired {
                ctx.release_lock(lock);
            }
            me.occupancy.leave();
        });
        self.occupancy.leave();
    }

    fn on_cancel(&mut self, ctx: &mut OperationContext<'_, Self>) {
        self.occupancy.enter();
        ctx.complete(ResultCode::Cancelled);
        self.occupancy.leave();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn hooks_of_one_instance_never_overlap() -> anyhow::Result<()> {
    let pool = Arc::new(DedicatedPool::new(PoolConfig::new(6))?);
    let lock = AsyncLock::new();

    let mut futures = Vec::new();
    let mut instances = Vec::new();
    for _ in 0..4 {
        let occupancy = Occupancy::default();
        let children = (0..16)
            .map(|_| AsyncOperation::new(Immediate::default(), pool.clone()))
            .collect();
        let op = AsyncOperation::new(
            Busy {
                children,
                occupancy: occupancy.clone(),
                lock: lock.clone(),
            },
            pool.clone(),
        );
        futures.push(op.start_async(None, None));
        instances.push((op, occupancy));
    }

    for (op, _) in &instances {
        let op = op.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(2));
            op.cancel();
        });
    }

    for future in futures {
        assert!(future.await?.is_cancelled());
    }
    for (op, occupancy) in &instances {
        assert_eq!(op.lifecycle_state(), LifecycleState::Completed);
        assert_eq!(occupancy.overlaps.load(Ordering::SeqCst), 0);
        assert!(!op.is_in_apartment());
    }
    assert!(!lock.is_locked());
    Ok(())
}
