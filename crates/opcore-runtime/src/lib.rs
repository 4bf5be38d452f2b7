//! Apartment-threaded asynchronous operations.
//!
//! An [`AsyncOperation`] wraps a derivation implementing [`Operation`]. Its
//! hooks run on pool threads, strictly one at a time per instance (the
//! instance's *apartment*), driven by events that any thread may post
//! through the public API. Operations compose into parent/child trees, share
//! resources through [`AsyncLock`], and can be reused once completed.

mod config;
mod context;
mod dispatcher;
mod future;
mod interceptor;
mod lock;
mod node;
mod operation;
mod violation;

pub use config::{OperationOptions, RuntimeConfig, ViolationPolicy};
pub use context::{Completion, OperationContext};
pub use future::OperationFuture;
pub use interceptor::{HookKind, Interception, Interceptor};
pub use lock::AsyncLock;
pub use node::OperationRef;
pub use operation::{AsyncOperation, CompletionCallback, Operation};
