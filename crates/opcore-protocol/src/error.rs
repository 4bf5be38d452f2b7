//! Error types for the operation runtime.
//!
//! Two disjoint classes. [`OperationError`] covers recoverable failures of the
//! surrounding plumbing. [`ContractViolation`] describes programmer errors;
//! it is never returned to callers but raised through the runtime's
//! violation policy, which terminates the offending thread or process.

use crate::ids::{LockId, OperationId};
use crate::state::LifecycleState;
use thiserror::Error;

/// Recoverable errors.
#[derive(Debug, Error)]
pub enum OperationError {
    #[error("operation {0} was dropped before delivering its completion")]
    Abandoned(OperationId),
    #[error("thread pool is shut down")]
    PoolShutDown,
    #[error("no timer runtime available: {0}")]
    TimerUnavailable(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Convenience result type for runtime plumbing.
pub type OperationResult<T> = Result<T, OperationError>;

/// Misuse of the operation contract. Always fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractViolation {
    #[error("operation {id}: {operation} is not valid in state {state}")]
    InvalidState {
        id: OperationId,
        operation: &'static str,
        state: LifecycleState,
    },
    #[error("operation {id}: start requested twice")]
    AlreadyStarted { id: OperationId },
    #[error("operation {id}: event {event} is not legal in state {state}")]
    IllegalEvent {
        id: OperationId,
        event: &'static str,
        state: LifecycleState,
    },
    #[error("operation {id}: reuse with {detail}")]
    DirtyReuse { id: OperationId, detail: String },
    #[error("operation {id}: releasing {requested} activities with only {outstanding} outstanding")]
    ActivityUnderflow {
        id: OperationId,
        requested: u32,
        outstanding: u32,
    },
    #[error("operation {id}: acquiring {requested} activities on top of {outstanding} overflows the count")]
    ActivityOverflow {
        id: OperationId,
        requested: u32,
        outstanding: u32,
    },
    #[error("operation {id}: a lock acquisition is already outstanding")]
    DuplicateLockAcquire { id: OperationId },
    #[error("operation {id}: released lock {lock} it does not own")]
    NotLockOwner { id: OperationId, lock: LockId },
    #[error("operation {id}: completed while holding {held} lock(s)")]
    LocksHeldAtCompletion { id: OperationId, held: u32 },
    #[error("operation {id}: dropped while {state}")]
    DroppedInFlight {
        id: OperationId,
        state: LifecycleState,
    },
    #[error("operation {id}: apartment detach requested twice in one dispatch turn")]
    DoubleDetach { id: OperationId },
    #[error("operation {id}: thread pool refused the dispatcher: {reason}")]
    Unschedulable { id: OperationId, reason: String },
    #[error("operation {id}: {operation} requires the caller to be on the operation's apartment")]
    NotInApartment {
        id: OperationId,
        operation: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn violation_messages_name_the_operation_and_state() {
        let id = OperationId::new();
        let violation = ContractViolation::InvalidState {
            id,
            operation: "reuse",
            state: LifecycleState::Operating,
        };
        let message = violation.to_string();
        assert!(message.contains(&id.to_string()));
        assert!(message.contains("reuse is not valid in state operating"));
    }

    #[test]
    fn underflow_reports_both_counts() {
        let violation = ContractViolation::ActivityUnderflow {
            id: OperationId::new(),
            requested: 3,
            outstanding: 1,
        };
        assert!(violation.to_string().contains("releasing 3 activities with only 1"));
    }
}
