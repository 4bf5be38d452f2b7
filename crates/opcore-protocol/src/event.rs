//! Event taxonomy, drain priority and the lifecycle transition table.
//!
//! Public entry points never run derivation code directly. They record an
//! event and make sure a thread is scheduled; the dispatcher then drains
//! events one at a time in a fixed priority order and asks [`resolve`] what
//! each one means in the current lifecycle state.

use crate::state::LifecycleState;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Kinds of events an operation's dispatcher can drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    StartRequested,
    CompleteRequested,
    /// A child reached `CompletionPending` and waits on this parent.
    SubOperationCompleted,
    LockAcquired,
    /// An outstanding lock wait was aborted by cancellation.
    LockAlerted,
    CancelRequested,
    CompletionAcknowledged,
}

impl EventKind {
    /// Drain order, highest priority first.
    pub const PRIORITY: [EventKind; 7] = [
        EventKind::StartRequested,
        EventKind::CompleteRequested,
        EventKind::SubOperationCompleted,
        EventKind::LockAcquired,
        EventKind::LockAlerted,
        EventKind::CancelRequested,
        EventKind::CompletionAcknowledged,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StartRequested => "start_requested",
            Self::CompleteRequested => "complete_requested",
            Self::SubOperationCompleted => "sub_operation_completed",
            Self::LockAcquired => "lock_acquired",
            Self::LockAlerted => "lock_alerted",
            Self::CancelRequested => "cancel_requested",
            Self::CompletionAcknowledged => "completion_acknowledged",
        }
    }

    /// The one-shot flag backing this event, if it is flag-backed.
    ///
    /// Sub-operation completions are queued instead, since several can be
    /// outstanding at once.
    pub fn flag(&self) -> Option<PendingEvents> {
        match self {
            Self::StartRequested => Some(PendingEvents::START),
            Self::CompleteRequested => Some(PendingEvents::COMPLETE),
            Self::SubOperationCompleted => None,
            Self::LockAcquired => Some(PendingEvents::LOCK_ACQUIRED),
            Self::LockAlerted => Some(PendingEvents::LOCK_ALERTED),
            Self::CancelRequested => Some(PendingEvents::CANCEL),
            Self::CompletionAcknowledged => Some(PendingEvents::COMPLETION_ACK),
        }
    }
}

bitflags! {
    /// One-shot pending event flags.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct PendingEvents: u8 {
        const START = 1 << 0;
        const COMPLETE = 1 << 1;
        const LOCK_ACQUIRED = 1 << 2;
        const LOCK_ALERTED = 1 << 3;
        const CANCEL = 1 << 4;
        const COMPLETION_ACK = 1 << 5;
    }
}

impl PendingEvents {
    /// Highest-priority pending event, without consuming it.
    pub fn peek(&self, sub_operations_waiting: bool) -> Option<EventKind> {
        EventKind::PRIORITY.into_iter().find(|kind| match kind.flag() {
            Some(flag) => self.contains(flag),
            None => sub_operations_waiting,
        })
    }

    /// Highest-priority pending event; its flag (if any) is cleared.
    pub fn take_next(&mut self, sub_operations_waiting: bool) -> Option<EventKind> {
        let next = self.peek(sub_operations_waiting)?;
        if let Some(flag) = next.flag() {
            self.remove(flag);
        }
        Some(next)
    }
}

/// What the dispatcher does with an event in a given lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Move to the given state (and run whatever that transition implies).
    Advance(LifecycleState),
    /// Hand the event to the derivation without changing state.
    Deliver,
    /// Silently ignore.
    Drop,
    /// The event cannot legally be pending in this state.
    Violation,
}

/// The lifecycle transition table.
///
/// | State | Start | Complete | Cancel | LockDone | SubOpDone | CompletionAck |
/// |---|---|---|---|---|---|---|
/// | Initialized | → Operating | drop | drop | fatal | fatal | fatal |
/// | Operating | fatal | → Completing | deliver | deliver | deliver | fatal |
/// | Completing | fatal | drop | drop | deliver | deliver | fatal |
/// | CompletionPending | fatal | drop | drop | fatal | fatal | → Completed |
/// | Completed | fatal | drop | drop | fatal | fatal | fatal |
///
/// `fatal` entries are [`Disposition::Violation`].
pub fn resolve(state: LifecycleState, event: EventKind) -> Disposition {
    use Disposition::{Advance, Deliver, Drop, Violation};
    use EventKind as E;
    use LifecycleState as S;

    match (state, event) {
        (S::Initialized, E::StartRequested) => Advance(S::Operating),
        (S::Initialized, E::CompleteRequested | E::CancelRequested) => Drop,
        (S::Initialized, _) => Violation,

        (S::Operating, E::CompleteRequested) => Advance(S::Completing),
        (
            S::Operating,
            E::CancelRequested | E::LockAcquired | E::LockAlerted | E::SubOperationCompleted,
        ) => Deliver,
        (S::Operating, E::StartRequested | E::CompletionAcknowledged) => Violation,

        (S::Completing, E::CompleteRequested | E::CancelRequested) => Drop,
        (S::Completing, E::LockAcquired | E::LockAlerted | E::SubOperationCompleted) => Deliver,
        (S::Completing, E::StartRequested | E::CompletionAcknowledged) => Violation,

        (S::CompletionPending, E::CompletionAcknowledged) => Advance(S::Completed),
        (S::CompletionPending, E::CompleteRequested | E::CancelRequested) => Drop,
        (S::CompletionPending, _) => Violation,

        (S::Completed, E::CompleteRequested | E::CancelRequested) => Drop,
        (S::Completed, _) => Violation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATES: [LifecycleState; 5] = [
        LifecycleState::Initialized,
        LifecycleState::Operating,
        LifecycleState::Completing,
        LifecycleState::CompletionPending,
        LifecycleState::Completed,
    ];

    #[test]
    fn start_is_observed_before_everything_else() {
        let pending = PendingEvents::all();
        assert_eq!(pending.peek(true), Some(EventKind::StartRequested));
    }

    #[test]
    fn sub_operations_drain_ahead_of_lock_events() {
        let pending = PendingEvents::LOCK_ACQUIRED | PendingEvents::CANCEL;
        assert_eq!(pending.peek(true), Some(EventKind::SubOperationCompleted));
        assert_eq!(pending.peek(false), Some(EventKind::LockAcquired));
    }

    #[test]
    fn take_next_drains_in_priority_order() {
        let mut pending = PendingEvents::CANCEL
            | PendingEvents::LOCK_ALERTED
            | PendingEvents::COMPLETE
            | PendingEvents::COMPLETION_ACK;
        let mut seen = Vec::new();
        while let Some(kind) = pending.take_next(false) {
            seen.push(kind);
        }
        assert_eq!(
            seen,
            vec![
                EventKind::CompleteRequested,
                EventKind::LockAlerted,
                EventKind::CancelRequested,
                EventKind::CompletionAcknowledged,
            ]
        );
        assert!(pending.is_empty());
    }

    #[test]
    fn sub_operation_event_is_not_flag_backed() {
        let mut pending = PendingEvents::empty();
        assert_eq!(
            pending.take_next(true),
            Some(EventKind::SubOperationCompleted)
        );
        assert!(pending.is_empty());
        assert_eq!(pending.take_next(false), None);
    }

    #[test]
    fn table_advances_along_the_lifecycle() {
        assert_eq!(
            resolve(LifecycleState::Initialized, EventKind::StartRequested),
            Disposition::Advance(LifecycleState::Operating)
        );
        assert_eq!(
            resolve(LifecycleState::Operating, EventKind::CompleteRequested),
            Disposition::Advance(LifecycleState::Completing)
        );
        assert_eq!(
            resolve(
                LifecycleState::CompletionPending,
                EventKind::CompletionAcknowledged
            ),
            Disposition::Advance(LifecycleState::Completed)
        );
    }

    #[test]
    fn complete_and_cancel_never_violate() {
        for state in STATES {
            for event in [EventKind::CompleteRequested, EventKind::CancelRequested] {
                assert_ne!(resolve(state, event), Disposition::Violation, "{state}");
            }
        }
    }

    #[test]
    fn cancel_is_delivered_only_while_operating() {
        for state in STATES {
            let expected = if state == LifecycleState::Operating {
                Disposition::Deliver
            } else {
                Disposition::Drop
            };
            assert_eq!(resolve(state, EventKind::CancelRequested), expected);
        }
    }

    #[test]
    fn start_outside_initialized_is_a_violation() {
        for state in STATES.into_iter().skip(1) {
            assert_eq!(
                resolve(state, EventKind::StartRequested),
                Disposition::Violation
            );
        }
    }
}
