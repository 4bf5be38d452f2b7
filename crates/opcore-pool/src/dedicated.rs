use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use opcore_protocol::{OperationError, OperationResult, ThreadPool, WorkItem};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info};

use crate::PoolConfig;

/// Fixed-size pool of OS threads.
///
/// Items still queued at shutdown are drained before the workers exit, so
/// every accepted item runs exactly once.
pub struct DedicatedPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    name: String,
}

struct Shared {
    queue: Mutex<QueueState>,
    available: Condvar,
}

#[derive(Default)]
struct QueueState {
    items: VecDeque<WorkItem>,
    shutdown: bool,
}

impl DedicatedPool {
    pub fn new(config: PoolConfig) -> OperationResult<Self> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(QueueState::default()),
            available: Condvar::new(),
        });

        let mut workers = Vec::with_capacity(config.worker_threads);
        for index in 0..config.worker_threads {
            let shared = shared.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-{index}", config.thread_name_prefix))
                .spawn(move || worker_loop(&shared))
                .map_err(|error| {
                    OperationError::InvalidConfig(format!("failed to spawn worker: {error}"))
                })?;
            workers.push(handle);
        }

        info!(
            workers = config.worker_threads,
            prefix = %config.thread_name_prefix,
            "dedicated pool started"
        );
        Ok(Self {
            shared,
            workers: Mutex::new(workers),
            name: config.thread_name_prefix,
        })
    }

    pub fn pending(&self) -> usize {
        self.shared.queue.lock().items.len()
    }

    /// Stop accepting work, drain the queue and join the workers.
    pub fn shutdown(&self) {
        {
            let mut queue = self.shared.queue.lock();
            if queue.shutdown {
                return;
            }
            queue.shutdown = true;
        }
        self.shared.available.notify_all();

        let current = thread::current().id();
        let workers = std::mem::take(&mut *self.workers.lock());
        let count = workers.len();
        for handle in workers {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!("worker thread panicked outside a work item");
            }
        }
        info!(workers = count, "dedicated pool shut down");
    }
}

impl ThreadPool for DedicatedPool {
    fn queue_work_item(&self, item: WorkItem) -> OperationResult<()> {
        {
            let mut queue = self.shared.queue.lock();
            if queue.shutdown {
                return Err(OperationError::PoolShutDown);
            }
            queue.items.push_back(item);
        }
        self.shared.available.notify_one();
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for DedicatedPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let item = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(item) = queue.items.pop_front() {
                    break item;
                }
                if queue.shutdown {
                    debug!("worker exiting");
                    return;
                }
                shared.available.wait(&mut queue);
            }
        };

        if catch_unwind(AssertUnwindSafe(item)).is_err() {
            error!("work item panicked; worker continues");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn runs_every_item_exactly_once() {
        let pool = DedicatedPool::new(PoolConfig::new(4)).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..200 {
            let counter = counter.clone();
            pool.queue_work_item(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }
        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 200);
    }

    #[test]
    fn workers_are_named_from_prefix() {
        let pool =
            DedicatedPool::new(PoolConfig::new(1).thread_name_prefix("naming-test")).unwrap();
        let (tx, rx) = mpsc::channel();
        pool.queue_work_item(Box::new(move || {
            let name = thread::current().name().map(str::to_owned);
            let _ = tx.send(name);
        }))
        .unwrap();
        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("naming-test-0"));
    }

    #[test]
    fn rejects_work_after_shutdown() {
        let pool = DedicatedPool::new(PoolConfig::new(1)).unwrap();
        pool.shutdown();
        let err = pool.queue_work_item(Box::new(|| {})).unwrap_err();
        assert!(matches!(err, OperationError::PoolShutDown));
    }

    fn explode() {
        panic!("boom");
    }

    #[test]
    fn panicking_item_does_not_kill_the_worker() {
        let pool = DedicatedPool::new(PoolConfig::new(1)).unwrap();
        pool.queue_work_item(Box::new(explode)).unwrap();
        let (tx, rx) = mpsc::channel();
        pool.queue_work_item(Box::new(move || {
            let _ = tx.send(());
        }))
        .unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    }
}
