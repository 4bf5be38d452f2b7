//! Runtime boundary ports.
//!
//! These traits are the only seams between the operation engine and its
//! environment: where work items run, and where trace records go.
//!
//! Object-safety note:
//! - Both traits are used as `Arc<dyn ...>` by the engine.

use crate::error::OperationResult;
use crate::trace::TraceRecord;

/// A unit of work handed to a thread pool.
pub type WorkItem = Box<dyn FnOnce() + Send + 'static>;

/// Queuing contract required from a thread pool.
///
/// Every accepted item must later be invoked exactly once on some worker
/// thread. No ordering between items is promised, and items are never
/// cancelled. `queue_work_item` must not run the item on the calling thread
/// and must not block.
pub trait ThreadPool: Send + Sync {
    fn queue_work_item(&self, item: WorkItem) -> OperationResult<()>;

    /// Human-readable name for diagnostics.
    fn name(&self) -> &str {
        "thread-pool"
    }
}

/// Receives trace records. Called on arbitrary threads, never while the
/// engine holds an operation's internal lock.
pub trait TraceSink: Send + Sync {
    fn record(&self, record: TraceRecord);
}

/// Discards every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTraceSink;

impl TraceSink for NullTraceSink {
    fn record(&self, _record: TraceRecord) {}
}
