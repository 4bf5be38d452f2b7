//! Completion result codes.
//!
//! The runtime never inspects a result beyond storing and delivering it;
//! interpretation belongs to the derivation and its callers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque outcome passed to `complete` and delivered to completion callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResultCode {
    Success,
    Cancelled,
    TimedOut,
    Failed { code: i32, reason: String },
}

impl ResultCode {
    pub fn failed(code: i32, reason: impl Into<String>) -> Self {
        Self::Failed {
            code,
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::TimedOut => f.write_str("timed out"),
            Self::Failed { code, reason } => write!(f, "failed ({code}): {reason}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_display_includes_code_and_reason() {
        let result = ResultCode::failed(5, "disk gone");
        assert_eq!(result.to_string(), "failed (5): disk gone");
        assert!(!result.is_success());
    }

    #[test]
    fn result_code_is_tagged_by_status() {
        let json = serde_json::to_value(ResultCode::failed(2, "nope")).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["code"], 2);
        let success = serde_json::to_value(ResultCode::Success).unwrap();
        assert_eq!(success, serde_json::json!({ "status": "success" }));
    }
}
