//! Trace records emitted by the runtime.
//!
//! Every lifecycle transition and activity-count change of an operation can
//! be reported to a [`TraceSink`](crate::ports::TraceSink). Records are plain
//! data so sinks can buffer, broadcast or serialize them.

use crate::event::EventKind;
use crate::ids::{ActivityId, LockId, OperationId};
use crate::result::ResultCode;
use crate::state::LifecycleState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub operation_id: OperationId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<ActivityId>,
    pub recorded_at: DateTime<Utc>,
    pub kind: TraceKind,
}

impl TraceRecord {
    pub fn new(operation_id: OperationId, activity_id: Option<ActivityId>, kind: TraceKind) -> Self {
        Self {
            operation_id,
            activity_id,
            recorded_at: Utc::now(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceKind {
    Lifecycle {
        from: LifecycleState,
        to: LifecycleState,
    },
    ActivityChanged {
        count: u32,
    },
    Dispatched {
        event: EventKind,
    },
    LockGranted {
        lock_id: LockId,
    },
    LockReleased {
        lock_id: LockId,
    },
    CancelAccepted,
    Completed {
        result: ResultCode,
    },
    Reused,
}

impl TraceKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Lifecycle { .. } => "lifecycle",
            Self::ActivityChanged { .. } => "activity_changed",
            Self::Dispatched { .. } => "dispatched",
            Self::LockGranted { .. } => "lock_granted",
            Self::LockReleased { .. } => "lock_released",
            Self::CancelAccepted => "cancel_accepted",
            Self::Completed { .. } => "completed",
            Self::Reused => "reused",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_record_serde_roundtrip() {
        let record = TraceRecord::new(
            OperationId::new(),
            Some(ActivityId::new()),
            TraceKind::Lifecycle {
                from: LifecycleState::Operating,
                to: LifecycleState::Completing,
            },
        );
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"type\":\"lifecycle\""));
        let back: TraceRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn missing_activity_is_omitted() {
        let record = TraceRecord::new(OperationId::new(), None, TraceKind::CancelAccepted);
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("activity_id").is_none());
        assert_eq!(record.kind.name(), "cancel_accepted");
    }
}
