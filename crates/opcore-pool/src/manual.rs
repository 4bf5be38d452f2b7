use std::collections::VecDeque;

use opcore_protocol::{OperationResult, ThreadPool, WorkItem};
use parking_lot::Mutex;
use tracing::trace;

/// Upper bound on items run by a single `run_until_idle` call; a runaway
/// reschedule loop trips this instead of hanging the test.
pub const RUN_UNTIL_IDLE_LIMIT: usize = 100_000;

/// A pool that never runs anything on its own.
///
/// Items are queued until the caller runs them, which makes interleavings
/// reproducible. Items always run on the calling thread, never inside
/// `queue_work_item`.
#[derive(Default)]
pub struct ManualPool {
    queue: Mutex<VecDeque<WorkItem>>,
}

impl ManualPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Runs the oldest queued item. Returns false if none was queued.
    pub fn run_next(&self) -> bool {
        let item = self.queue.lock().pop_front();
        Self::run(item)
    }

    /// Runs the newest queued item. Returns false if none was queued.
    pub fn run_newest(&self) -> bool {
        let item = self.queue.lock().pop_back();
        Self::run(item)
    }

    /// Runs items (including ones queued while running) until the queue is
    /// empty. Returns how many ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
            assert!(
                ran < RUN_UNTIL_IDLE_LIMIT,
                "manual pool did not go idle after {RUN_UNTIL_IDLE_LIMIT} items"
            );
        }
        trace!(ran, "manual pool idle");
        ran
    }

    fn run(item: Option<WorkItem>) -> bool {
        match item {
            Some(item) => {
                item();
                true
            }
            None => false,
        }
    }
}

impl ThreadPool for ManualPool {
    fn queue_work_item(&self, item: WorkItem) -> OperationResult<()> {
        self.queue.lock().push_back(item);
        Ok(())
    }

    fn name(&self) -> &str {
        "manual"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn nothing_runs_until_asked() {
        let pool = ManualPool::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let log = log.clone();
            pool.queue_work_item(Box::new(move || log.lock().push(i)))
                .unwrap();
        }
        assert_eq!(pool.pending(), 3);
        assert!(log.lock().is_empty());

        assert!(pool.run_newest());
        assert_eq!(pool.run_until_idle(), 2);
        assert_eq!(*log.lock(), vec![2, 0, 1]);
        assert!(!pool.run_next());
    }

    #[test]
    fn items_queued_while_running_are_drained() {
        let pool = Arc::new(ManualPool::new());
        let inner = pool.clone();
        pool.queue_work_item(Box::new(move || {
            inner.queue_work_item(Box::new(|| {})).unwrap();
        }))
        .unwrap();
        assert_eq!(pool.run_until_idle(), 2);
    }
}
