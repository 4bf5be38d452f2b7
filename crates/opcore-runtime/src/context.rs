use opcore_protocol::{AmbientContext, OperationId, ResultCode};

use crate::lock::AsyncLock;
use crate::node::OperationRef;
use crate::operation::{AsyncOperation, Operation};

/// What a derivation learns about its own completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub operation_id: OperationId,
    pub result: ResultCode,
    /// A cancel request was accepted during this cycle.
    pub cancel_requested: bool,
    pub ambient: Option<AmbientContext>,
}

/// The derivation's view of its operation while it runs on the apartment.
///
/// Handed to every hook and callback. All methods are safe to call: no
/// runtime lock is held while derivation code runs.
pub struct OperationContext<'a, D: Operation> {
    operation: &'a AsyncOperation<D>,
}

impl<'a, D: Operation> OperationContext<'a, D> {
    pub(crate) fn new(operation: &'a AsyncOperation<D>) -> Self {
        Self { operation }
    }

    pub fn id(&self) -> OperationId {
        self.operation.id()
    }

    pub fn operation(&self) -> &'a AsyncOperation<D> {
        self.operation
    }

    pub fn operation_ref(&self) -> OperationRef {
        self.operation.operation_ref()
    }

    pub fn complete(&self, result: ResultCode) -> bool {
        self.operation.complete(result)
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.operation.is_cancel_requested()
    }

    pub fn ambient(&self) -> Option<AmbientContext> {
        self.operation.ambient()
    }

    pub fn is_in_apartment(&self) -> bool {
        self.operation.is_in_apartment()
    }

    pub fn acquire_lock<F>(&self, lock: &AsyncLock, on_acquired: F)
    where
        F: FnOnce(&mut D, &mut OperationContext<'_, D>, bool, &AsyncLock) + Send + 'static,
    {
        self.operation.acquire_lock(lock, on_acquired)
    }

    pub fn release_lock(&self, lock: &AsyncLock) {
        self.operation.release_lock(lock)
    }

    pub fn is_lock_owner(&self, lock: &AsyncLock) -> bool {
        self.operation.is_lock_owner(lock)
    }

    pub fn acquire_activities(&self, count: u32) {
        self.operation.acquire_activities(count)
    }

    pub fn try_acquire_activities(&self, count: u32) -> bool {
        self.operation.try_acquire_activities(count)
    }

    pub fn release_activities(&self, count: u32) -> bool {
        self.operation.release_activities(count)
    }

    /// Starts `child` under this operation. `on_completed` runs on this
    /// apartment after the child's own completion hook.
    pub fn start_child<C, F>(&self, child: &AsyncOperation<C>, on_completed: F)
    where
        C: Operation,
        F: FnOnce(&mut D, &mut OperationContext<'_, D>, &AsyncOperation<C>) + Send + 'static,
    {
        self.start_child_with(child, None, on_completed)
    }

    /// [`start_child`](Self::start_child) with an explicit ambient context
    /// instead of this operation's.
    pub fn start_child_with<C, F>(
        &self,
        child: &AsyncOperation<C>,
        ambient: Option<AmbientContext>,
        on_completed: F,
    ) where
        C: Operation,
        F: FnOnce(&mut D, &mut OperationContext<'_, D>, &AsyncOperation<C>) + Send + 'static,
    {
        let parent = self.operation.clone();
        child.start(
            Some(&self.operation_ref()),
            Some(Box::new(
                move |_: Option<&OperationRef>, child: &AsyncOperation<C>| {
                    parent.run_in_apartment("child completion callback", |logic, ctx| {
                        on_completed(logic, ctx, child)
                    });
                },
            )),
            ambient,
        );
    }

    /// Releases the apartment once the current hook returns and runs
    /// `blocking` on this thread. Pending events are picked up by another
    /// thread meanwhile, so `blocking` gets only the handle, not the
    /// derivation. At most once per dispatch turn.
    pub fn detach<F>(&self, blocking: F)
    where
        F: FnOnce(AsyncOperation<D>) + Send + 'static,
    {
        self.operation.request_detach(Box::new(blocking))
    }
}
