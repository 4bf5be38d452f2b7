use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use opcore_protocol::{ContractViolation, LockId, OperationId};
use parking_lot::Mutex;
use tracing::trace;

use crate::node::LockWaiter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AcquireOutcome {
    /// The lock was free; the requester owns it now.
    Granted,
    /// The requester joined the FIFO wait queue.
    Queued,
}

#[derive(Default)]
struct LockState {
    owner: Option<OperationId>,
    waiters: IndexMap<OperationId, Box<dyn LockWaiter>>,
}

struct LockInner {
    id: LockId,
    name: Option<String>,
    state: Mutex<LockState>,
}

/// Non-reentrant mutual exclusion between operations.
///
/// Waiting never blocks a thread: a queued operation's apartment is released
/// and its acquired callback is scheduled when ownership is handed over.
/// Ownership transfers directly to the longest waiter on release, so the
/// lock is never observed free while waiters are queued.
#[derive(Clone)]
pub struct AsyncLock {
    inner: Arc<LockInner>,
}

impl AsyncLock {
    pub fn new() -> Self {
        Self::build(None)
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self::build(Some(name.into()))
    }

    fn build(name: Option<String>) -> Self {
        Self {
            inner: Arc::new(LockInner {
                id: LockId::new(),
                name,
                state: Mutex::new(LockState::default()),
            }),
        }
    }

    pub fn id(&self) -> LockId {
        self.inner.id
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    pub fn owner(&self) -> Option<OperationId> {
        self.inner.state.lock().owner
    }

    pub fn is_locked(&self) -> bool {
        self.owner().is_some()
    }

    pub fn waiter_count(&self) -> usize {
        self.inner.state.lock().waiters.len()
    }

    /// Queued operations, longest waiting first.
    pub fn waiters(&self) -> Vec<OperationId> {
        self.inner.state.lock().waiters.keys().copied().collect()
    }

    pub(crate) fn acquire(
        &self,
        requester: Box<dyn LockWaiter>,
    ) -> Result<AcquireOutcome, ContractViolation> {
        let id = requester.waiter_id();
        let mut state = self.inner.state.lock();
        if state.owner == Some(id) || state.waiters.contains_key(&id) {
            return Err(ContractViolation::DuplicateLockAcquire { id });
        }
        if state.owner.is_none() {
            state.owner = Some(id);
            trace!(lock_id = %self.inner.id, operation_id = %id, "lock granted immediately");
            return Ok(AcquireOutcome::Granted);
        }
        state.waiters.insert(id, requester);
        trace!(
            lock_id = %self.inner.id,
            operation_id = %id,
            waiters = state.waiters.len(),
            "lock busy, queued"
        );
        Ok(AcquireOutcome::Queued)
    }

    /// Gives up ownership. The returned waiter now owns the lock and must be
    /// notified by the caller once no lock is held.
    pub(crate) fn release(
        &self,
        requester: OperationId,
    ) -> Result<Option<Box<dyn LockWaiter>>, ContractViolation> {
        let mut state = self.inner.state.lock();
        if state.owner != Some(requester) {
            return Err(ContractViolation::NotLockOwner {
                id: requester,
                lock: self.inner.id,
            });
        }
        match state.waiters.shift_remove_index(0) {
            Some((next, waiter)) => {
                state.owner = Some(next);
                trace!(lock_id = %self.inner.id, from = %requester, to = %next, "lock handed over");
                Ok(Some(waiter))
            }
            None => {
                state.owner = None;
                Ok(None)
            }
        }
    }

    /// Removes a queued requester. False if it was not waiting (never
    /// queued, or already granted).
    pub(crate) fn cancel_acquire(&self, requester: OperationId) -> bool {
        let removed = self.inner.state.lock().waiters.shift_remove(&requester);
        removed.is_some()
    }
}

impl Default for AsyncLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AsyncLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("AsyncLock")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("owner", &state.owner)
            .field("waiters", &state.waiters.len())
            .finish()
    }
}
