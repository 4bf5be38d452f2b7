//! # opcore-protocol: asynchronous operation contract
//!
//! Shared types and trait interfaces for the opcore operation runtime. Every
//! engine, pool and trace crate in the workspace depends on this crate.
//!
//! It is intentionally dependency-light (no tokio, no threads) so it can be
//! used as a pure contract crate.
//!
//! ## Module Overview
//!
//! - [`ids`]: Typed ID wrappers (OperationId, LockId, ActivityId)
//! - [`state`]: LifecycleState, DispatcherState
//! - [`event`]: EventKind priority order, PendingEvents, the transition table
//! - [`result`]: ResultCode delivered to completion callbacks
//! - [`context`]: AmbientContext inherited from parent operations
//! - [`trace`]: TraceRecord, TraceKind
//! - [`ports`]: Runtime boundary ports (thread pool, trace sink)
//! - [`error`]: OperationError, ContractViolation

pub mod context;
pub mod error;
pub mod event;
pub mod ids;
pub mod ports;
pub mod result;
pub mod state;
pub mod trace;

// Re-export the most commonly used types at the crate root.
pub use context::AmbientContext;
pub use error::{ContractViolation, OperationError, OperationResult};
pub use event::{Disposition, EventKind, PendingEvents, resolve};
pub use ids::{ActivityId, LockId, OperationId};
pub use ports::{NullTraceSink, ThreadPool, TraceSink, WorkItem};
pub use result::ResultCode;
pub use state::{DispatcherState, LifecycleState};
pub use trace::{TraceKind, TraceRecord};
