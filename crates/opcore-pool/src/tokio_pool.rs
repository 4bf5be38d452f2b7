use std::sync::Arc;

use opcore_protocol::{OperationError, OperationResult, ThreadPool, WorkItem};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::warn;

/// Runs work items on a tokio runtime's blocking threads. A dispatch turn
/// may detach and block, so async workers are never used.
#[derive(Debug, Clone)]
pub struct TokioPool {
    handle: Handle,
}

impl TokioPool {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Pool on the runtime the caller is currently inside.
    pub fn current() -> OperationResult<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|error| OperationError::InvalidConfig(format!("no tokio runtime: {error}")))
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl ThreadPool for TokioPool {
    /// A runtime that has shut down drops the closure without running it.
    /// The item is parked in a shared slot so that refusal can be seen here.
    fn queue_work_item(&self, item: WorkItem) -> OperationResult<()> {
        let slot = Arc::new(Mutex::new(Some(item)));
        let runner = slot.clone();
        drop(self.handle.spawn_blocking(move || {
            let item = runner.lock().take();
            if let Some(item) = item {
                item();
            }
        }));

        if Arc::strong_count(&slot) == 1 && slot.lock().take().is_some() {
            warn!("tokio runtime refused a work item");
            return Err(OperationError::PoolShutDown);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "tokio-blocking"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn queued_item_runs_on_the_runtime() {
        let pool = TokioPool::current().unwrap();
        let (tx, rx) = oneshot::channel();
        pool.queue_work_item(Box::new(move || {
            let _ = tx.send(42);
        }))
        .unwrap();
        assert_eq!(rx.await.unwrap(), 42);
    }

    #[test]
    fn shut_down_runtime_refuses_items() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let pool = TokioPool::new(runtime.handle().clone());
        runtime.shutdown_timeout(Duration::from_millis(100));

        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let err = pool
            .queue_work_item(Box::new(move || flag.store(true, Ordering::SeqCst)))
            .unwrap_err();
        assert!(matches!(err, OperationError::PoolShutDown));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn current_fails_outside_a_runtime() {
        assert!(TokioPool::current().is_err());
    }
}
