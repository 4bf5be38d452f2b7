//! Lifecycle and dispatcher states.
//!
//! The lifecycle state says where an operation is in its
//! start/complete/reuse cycle. The dispatcher state says whether a thread is
//! currently servicing (or queued to service) the operation's apartment.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where an operation instance is in its lifecycle.
///
/// Instances cycle `Initialized → Operating → Completing → CompletionPending
/// → Completed → (reuse) → Initialized`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Constructed or reused, not yet observed a start request.
    #[default]
    Initialized,
    /// `on_start` has run; the derivation is doing its work.
    Operating,
    /// A result was recorded; waiting for outstanding activities to settle.
    Completing,
    /// Activities settled; waiting for the completion to be delivered and acknowledged.
    CompletionPending,
    /// Fully finalized. The instance may be dropped or reused.
    Completed,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Operating => "operating",
            Self::Completing => "completing",
            Self::CompletionPending => "completion_pending",
            Self::Completed => "completed",
        }
    }

    /// Between the start request being observed and full finalization.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            Self::Operating | Self::Completing | Self::CompletionPending
        )
    }

    /// States in which an instance may be dropped or reused.
    pub fn is_at_rest(&self) -> bool {
        matches!(self, Self::Initialized | Self::Completed)
    }

    /// States in which lock operations are legal.
    pub fn accepts_lock_operations(&self) -> bool {
        matches!(self, Self::Operating | Self::Completing)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether (and how) a thread is attached to an operation's apartment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatcherState {
    /// No thread attached and nothing queued.
    #[default]
    Idle,
    /// Exactly one work item is queued on the thread pool.
    Runnable,
    /// A thread is draining the event queue. At most one at a time.
    Running,
    /// Idle, with a lock acquisition outstanding.
    WaitingOnLock,
}

impl DispatcherState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Runnable => "runnable",
            Self::Running => "running",
            Self::WaitingOnLock => "waiting_on_lock",
        }
    }

    /// True when a thread is already running or queued, so new work coalesces.
    pub fn is_scheduled(&self) -> bool {
        matches!(self, Self::Runnable | Self::Running)
    }
}

impl fmt::Display for DispatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_defaults_to_initialized() {
        assert_eq!(LifecycleState::default(), LifecycleState::Initialized);
        assert_eq!(DispatcherState::default(), DispatcherState::Idle);
    }

    #[test]
    fn at_rest_and_in_flight_partition_the_states() {
        for state in [
            LifecycleState::Initialized,
            LifecycleState::Operating,
            LifecycleState::Completing,
            LifecycleState::CompletionPending,
            LifecycleState::Completed,
        ] {
            assert_ne!(state.is_at_rest(), state.is_in_flight(), "{state}");
        }
    }

    #[test]
    fn only_running_and_runnable_count_as_scheduled() {
        assert!(DispatcherState::Runnable.is_scheduled());
        assert!(DispatcherState::Running.is_scheduled());
        assert!(!DispatcherState::Idle.is_scheduled());
        assert!(!DispatcherState::WaitingOnLock.is_scheduled());
    }

    #[test]
    fn lifecycle_serializes_snake_case() {
        let json = serde_json::to_string(&LifecycleState::CompletionPending).unwrap();
        assert_eq!(json, "\"completion_pending\"");
        let back: LifecycleState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, LifecycleState::CompletionPending);
    }
}
