use std::fmt;
use std::sync::Arc;

use opcore_protocol::TraceSink;

use crate::interceptor::Interceptor;

/// What happens when code breaks the operation contract.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ViolationPolicy {
    /// Abort the process.
    #[default]
    Abort,
    /// Panic on the offending thread, for tests that assert on the message.
    ///
    /// Pools catch panicking work items, so a violation raised on a pool
    /// thread under this policy leaves the operation stuck in its dispatcher.
    Panic,
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    pub violation_policy: ViolationPolicy,
    /// Let an operation reach `CompletionPending` while still holding locks.
    /// Reuse still refuses such an instance.
    pub permit_locks_held_on_completion: bool,
    /// Emit a `Dispatched` trace record for every drained event.
    pub trace_dispatch: bool,
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn violation_policy(mut self, policy: ViolationPolicy) -> Self {
        self.violation_policy = policy;
        self
    }

    pub fn permit_locks_held_on_completion(mut self, permit: bool) -> Self {
        self.permit_locks_held_on_completion = permit;
        self
    }

    pub fn trace_dispatch(mut self, enabled: bool) -> Self {
        self.trace_dispatch = enabled;
        self
    }
}

/// Per-instance wiring: config plus the optional trace sink and interceptor.
#[derive(Clone, Default)]
pub struct OperationOptions {
    pub(crate) config: RuntimeConfig,
    pub(crate) trace: Option<Arc<dyn TraceSink>>,
    pub(crate) interceptor: Option<Arc<dyn Interceptor>>,
}

impl OperationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace = Some(sink);
        self
    }

    pub fn interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptor = Some(interceptor);
        self
    }

    pub fn permit_locks_held_on_completion(mut self, permit: bool) -> Self {
        self.config.permit_locks_held_on_completion = permit;
        self
    }

    pub fn violation_policy(mut self, policy: ViolationPolicy) -> Self {
        self.config.violation_policy = policy;
        self
    }

    pub fn runtime_config(&self) -> &RuntimeConfig {
        &self.config
    }
}

impl fmt::Debug for OperationOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationOptions")
            .field("config", &self.config)
            .field("trace", &self.trace.is_some())
            .field("interceptor", &self.interceptor.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_abort_and_forbid_held_locks() {
        let config = RuntimeConfig::new();
        assert_eq!(config.violation_policy, ViolationPolicy::Abort);
        assert!(!config.permit_locks_held_on_completion);
        assert!(!config.trace_dispatch);
    }

    #[test]
    fn options_opt_out_flows_into_config() {
        let options = OperationOptions::new()
            .config(RuntimeConfig::new().trace_dispatch(true))
            .permit_locks_held_on_completion(true)
            .violation_policy(ViolationPolicy::Panic);
        assert!(options.runtime_config().permit_locks_held_on_completion);
        assert!(options.runtime_config().trace_dispatch);
        assert_eq!(
            options.runtime_config().violation_policy,
            ViolationPolicy::Panic
        );
        assert!(format!("{options:?}").contains("interceptor: false"));
    }
}
