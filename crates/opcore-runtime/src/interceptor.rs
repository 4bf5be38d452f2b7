use crate::node::OperationRef;

/// Derivation hooks an [`Interceptor`] can observe or suppress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    Start,
    Cancel,
    Reuse,
    Completed,
}

impl HookKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Cancel => "cancel",
            Self::Reuse => "reuse",
            Self::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interception {
    Proceed,
    /// Skip the derivation hook. After a suppressed `Start` the interceptor
    /// owns completing the operation.
    Suppress,
}

/// Test seam wrapped around every derivation hook.
///
/// Runs on the operation's apartment, before and after the hook. The
/// operation handle is fully usable, so an interceptor may complete or
/// cancel the operation itself (fault injection).
pub trait Interceptor: Send + Sync {
    fn before_hook(&self, hook: HookKind, operation: &OperationRef) -> Interception;

    fn after_hook(&self, _hook: HookKind, _operation: &OperationRef) {}
}
