//! Ambient caller context.
//!
//! An operation resolves its ambient context at start: an explicit override
//! wins, otherwise it inherits its parent's, otherwise it has none. The
//! context is readable by the derivation while running and cleared when the
//! instance finalizes.

use crate::ids::ActivityId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmbientContext {
    pub activity_id: ActivityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl AmbientContext {
    pub fn new(activity_id: ActivityId) -> Self {
        Self {
            activity_id,
            label: None,
        }
    }

    /// Fresh context with a random activity ID.
    pub fn fresh() -> Self {
        Self::new(ActivityId::new())
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// The override if given, else the inherited context.
    pub fn resolve(
        override_context: Option<AmbientContext>,
        inherited: Option<AmbientContext>,
    ) -> Option<AmbientContext> {
        override_context.or(inherited)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_wins_over_inherited() {
        let parent = AmbientContext::fresh().with_label("parent");
        let explicit = AmbientContext::fresh().with_label("explicit");
        let resolved = AmbientContext::resolve(Some(explicit.clone()), Some(parent));
        assert_eq!(resolved, Some(explicit));
    }

    #[test]
    fn inherits_when_no_override() {
        let parent = AmbientContext::fresh();
        assert_eq!(
            AmbientContext::resolve(None, Some(parent.clone())),
            Some(parent)
        );
        assert_eq!(AmbientContext::resolve(None, None), None);
    }

    #[test]
    fn label_is_skipped_when_absent() {
        let json = serde_json::to_value(AmbientContext::fresh()).unwrap();
        assert!(json.get("label").is_none());
    }
}
