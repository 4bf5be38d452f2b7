//! Thread pools that satisfy the [`ThreadPool`](opcore_protocol::ThreadPool)
//! queuing contract.
//!
//! - [`DedicatedPool`]: a fixed set of OS threads owned by the pool.
//! - [`TokioPool`]: hands work items to a tokio runtime's blocking threads.
//! - [`ManualPool`]: queues items until a test runs them, for deterministic
//!   interleavings.

mod dedicated;
mod manual;
mod tokio_pool;

pub use dedicated::DedicatedPool;
pub use manual::ManualPool;
pub use tokio_pool::TokioPool;

const MAX_DEFAULT_WORKERS: usize = 8;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub worker_threads: usize,
    pub thread_name_prefix: String,
}

impl PoolConfig {
    pub fn new(worker_threads: usize) -> Self {
        Self {
            worker_threads: worker_threads.max(1),
            ..Self::default()
        }
    }

    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        Self {
            worker_threads: parallelism.min(MAX_DEFAULT_WORKERS),
            thread_name_prefix: "opcore-worker".to_owned(),
        }
    }
}
