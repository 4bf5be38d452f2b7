//! Single import point for the opcore operation runtime.
//!
//! ```no_run
//! use opcore::prelude::*;
//!
//! struct Hello;
//!
//! impl Operation for Hello {
//!     fn on_start(&mut self, ctx: &mut OperationContext<'_, Self>) {
//!         ctx.complete(ResultCode::Success);
//!     }
//! }
//!
//! # async fn run() -> anyhow::Result<()> {
//! let kernel = KernelBuilder::new().build()?;
//! let result = kernel.operation(Hello).start_async(None, None).await?;
//! assert!(result.is_success());
//! # Ok(())
//! # }
//! ```

pub use opcore_events as events;
pub use opcore_kernel as kernel;
pub use opcore_pool as pool;
pub use opcore_protocol as protocol;
pub use opcore_runtime as runtime;

pub mod prelude {
    pub use opcore_kernel::{CancelAfter, Delay, Kernel, KernelBuilder, PoolFlavor};
    pub use opcore_protocol::{
        AmbientContext, LifecycleState, OperationError, OperationId, OperationResult, ResultCode,
    };
    pub use opcore_runtime::{
        AsyncLock, AsyncOperation, Completion, Operation, OperationContext, OperationRef,
    };
}
