use opcore_protocol::ContractViolation;
use tracing::error;

use crate::config::ViolationPolicy;

/// Reports a contract violation and terminates according to `policy`.
pub fn raise(policy: ViolationPolicy, violation: ContractViolation) -> ! {
    error!(%violation, ?policy, "operation contract violated");
    match policy {
        ViolationPolicy::Panic => panic!("contract violation: {violation}"),
        ViolationPolicy::Abort => std::process::abort(),
    }
}
