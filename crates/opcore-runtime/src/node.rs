use std::fmt;
use std::sync::Arc;

use opcore_protocol::{AmbientContext, LifecycleState, OperationId, ResultCode};

/// Type-erased view of an operation, whatever its derivation.
pub(crate) trait OperationNode: Send + Sync {
    fn id(&self) -> OperationId;
    fn lifecycle_state(&self) -> LifecycleState;
    fn result(&self) -> Option<ResultCode>;
    fn complete(&self, result: ResultCode) -> bool;
    fn cancel(&self) -> bool;
    fn is_cancel_requested(&self) -> bool;
    fn ambient(&self) -> Option<AmbientContext>;
    fn is_in_apartment(&self) -> bool;
    fn acquire_activities(&self, count: u32);
    fn try_acquire_activities(&self, count: u32) -> bool;
    fn release_activities(&self, count: u32) -> bool;
    fn enqueue_completed_child(&self, child: Box<dyn ChildCompletion>);
}

/// A child that reached `CompletionPending` and waits on its parent.
pub(crate) trait ChildCompletion: Send + Sync {
    fn child_id(&self) -> OperationId;

    /// Runs on the parent's apartment: completion hook, callback, then the
    /// acknowledgement back to the child.
    fn deliver(&self, parent: &OperationRef);
}

/// An operation queued on an [`AsyncLock`](crate::AsyncLock).
pub(crate) trait LockWaiter: Send + Sync {
    fn waiter_id(&self) -> OperationId;

    /// Ownership was transferred to this waiter. Never called while the
    /// lock's own state is held.
    fn lock_granted(&self);
}

/// Cloneable handle to any operation, used for parents and by code that
/// does not know the derivation type.
#[derive(Clone)]
pub struct OperationRef {
    node: Arc<dyn OperationNode>,
}

impl OperationRef {
    pub(crate) fn new(node: Arc<dyn OperationNode>) -> Self {
        Self { node }
    }

    pub fn id(&self) -> OperationId {
        self.node.id()
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.node.lifecycle_state()
    }

    /// The recorded result, once the operation reached `CompletionPending`.
    pub fn result(&self) -> Option<ResultCode> {
        self.node.result()
    }

    pub fn complete(&self, result: ResultCode) -> bool {
        self.node.complete(result)
    }

    pub fn cancel(&self) -> bool {
        self.node.cancel()
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.node.is_cancel_requested()
    }

    pub fn ambient(&self) -> Option<AmbientContext> {
        self.node.ambient()
    }

    pub fn is_in_apartment(&self) -> bool {
        self.node.is_in_apartment()
    }

    pub fn acquire_activities(&self, count: u32) {
        self.node.acquire_activities(count)
    }

    pub fn try_acquire_activities(&self, count: u32) -> bool {
        self.node.try_acquire_activities(count)
    }

    pub fn release_activities(&self, count: u32) -> bool {
        self.node.release_activities(count)
    }

    pub(crate) fn enqueue_completed_child(&self, child: Box<dyn ChildCompletion>) {
        self.node.enqueue_completed_child(child)
    }
}

impl PartialEq for OperationRef {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for OperationRef {}

impl fmt::Debug for OperationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationRef")
            .field("id", &self.id())
            .field("state", &self.lifecycle_state())
            .finish()
    }
}
