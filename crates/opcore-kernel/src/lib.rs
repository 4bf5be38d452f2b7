use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use opcore_events::{TraceHub, TraceJournal, TraceRecorder};
use opcore_pool::{DedicatedPool, PoolConfig, TokioPool};
use opcore_protocol::{OperationError, OperationResult, ThreadPool, TraceRecord};
use opcore_runtime::{
    AsyncLock, AsyncOperation, Interceptor, Operation, OperationOptions, OperationRef,
    RuntimeConfig, ViolationPolicy,
};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{info, instrument};

mod timer;

pub use timer::{CancelAfter, Delay};

/// Which thread pool the kernel builds when none is supplied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PoolFlavor {
    /// OS threads owned by the kernel.
    #[default]
    Dedicated,
    /// Blocking threads of a tokio runtime.
    Tokio,
}

#[derive(Clone)]
pub struct KernelBuilder {
    flavor: PoolFlavor,
    worker_threads: Option<usize>,
    thread_name_prefix: String,
    trace_buffer: usize,
    record_traces: bool,
    config: RuntimeConfig,
    pool: Option<Arc<dyn ThreadPool>>,
    interceptor: Option<Arc<dyn Interceptor>>,
    runtime: Option<Handle>,
}

impl KernelBuilder {
    pub fn new() -> Self {
        Self {
            flavor: PoolFlavor::default(),
            worker_threads: None,
            thread_name_prefix: "opcore-worker".to_owned(),
            trace_buffer: 1024,
            record_traces: false,
            config: RuntimeConfig::default(),
            pool: None,
            interceptor: None,
            runtime: None,
        }
    }

    pub fn pool_flavor(mut self, flavor: PoolFlavor) -> Self {
        self.flavor = flavor;
        self
    }

    pub fn worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = Some(worker_threads);
        self
    }

    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    pub fn trace_buffer(mut self, capacity: usize) -> Self {
        self.trace_buffer = capacity;
        self
    }

    /// Keep every trace record in memory as well as broadcasting it.
    pub fn record_traces(mut self, enabled: bool) -> Self {
        self.record_traces = enabled;
        self
    }

    pub fn runtime_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn violation_policy(mut self, policy: ViolationPolicy) -> Self {
        self.config.violation_policy = policy;
        self
    }

    /// Use this pool instead of building one.
    pub fn pool(mut self, pool: Arc<dyn ThreadPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptor = Some(interceptor);
        self
    }

    /// Runtime used for timers and the tokio pool flavour. Defaults to the
    /// runtime `build` is called from, if any.
    pub fn tokio_handle(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn build(self) -> Result<Kernel> {
        if self.trace_buffer == 0 {
            return Err(OperationError::InvalidConfig("trace buffer must be non-zero".into()).into());
        }
        let runtime = self.runtime.or_else(|| Handle::try_current().ok());

        let pool: Arc<dyn ThreadPool> = match (self.pool, self.flavor) {
            (Some(pool), _) => pool,
            (None, PoolFlavor::Dedicated) => {
                let mut config = match self.worker_threads {
                    Some(worker_threads) => PoolConfig::new(worker_threads),
                    None => PoolConfig::default(),
                };
                config = config.thread_name_prefix(self.thread_name_prefix);
                Arc::new(DedicatedPool::new(config).context("failed to start dedicated pool")?)
            }
            (None, PoolFlavor::Tokio) => {
                let handle = runtime
                    .clone()
                    .context("tokio pool flavour needs a tokio runtime")?;
                Arc::new(TokioPool::new(handle))
            }
        };

        let mut journal = TraceJournal::new(TraceHub::new(self.trace_buffer));
        if self.record_traces {
            journal = journal.with_recorder(Arc::new(TraceRecorder::new()));
        }

        info!(
            pool = pool.name(),
            timers = runtime.is_some(),
            record_traces = self.record_traces,
            violation_policy = ?self.config.violation_policy,
            "kernel ready"
        );

        Ok(Kernel {
            pool,
            journal: Arc::new(journal),
            config: self.config,
            interceptor: self.interceptor,
            runtime,
        })
    }
}

impl Default for KernelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for KernelBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelBuilder")
            .field("flavor", &self.flavor)
            .field("worker_threads", &self.worker_threads)
            .field("trace_buffer", &self.trace_buffer)
            .field("record_traces", &self.record_traces)
            .field("config", &self.config)
            .field("custom_pool", &self.pool.is_some())
            .finish()
    }
}

/// Shared pool, trace fan-out and config for every operation it creates.
#[derive(Clone)]
pub struct Kernel {
    pool: Arc<dyn ThreadPool>,
    journal: Arc<TraceJournal>,
    config: RuntimeConfig,
    interceptor: Option<Arc<dyn Interceptor>>,
    runtime: Option<Handle>,
}

impl Kernel {
    pub fn builder() -> KernelBuilder {
        KernelBuilder::new()
    }

    pub fn pool(&self) -> &Arc<dyn ThreadPool> {
        &self.pool
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn options(&self) -> OperationOptions {
        let options = OperationOptions::new()
            .config(self.config.clone())
            .trace_sink(self.journal.clone());
        match &self.interceptor {
            Some(interceptor) => options.interceptor(interceptor.clone()),
            None => options,
        }
    }

    pub fn operation<D: Operation>(&self, logic: D) -> AsyncOperation<D> {
        AsyncOperation::with_options(logic, self.pool.clone(), self.options())
    }

    pub fn lock(&self, name: impl Into<String>) -> AsyncLock {
        AsyncLock::named(name)
    }

    pub fn subscribe_traces(&self) -> broadcast::Receiver<TraceRecord> {
        self.journal.subscribe()
    }

    pub fn recorder(&self) -> Option<&Arc<TraceRecorder>> {
        self.journal.recorder()
    }

    fn timer(&self) -> OperationResult<Handle> {
        self.runtime.clone().ok_or_else(|| {
            OperationError::TimerUnavailable("kernel was built outside a tokio runtime".into())
        })
    }

    #[instrument(skip(self))]
    pub fn delay(&self, duration: Duration) -> OperationResult<AsyncOperation<Delay>> {
        Ok(self.operation(Delay::new(duration, self.timer()?)))
    }

    #[instrument(skip(self, target), fields(target_id = %target.id()))]
    pub fn cancel_after(
        &self,
        target: OperationRef,
        duration: Duration,
    ) -> OperationResult<AsyncOperation<CancelAfter>> {
        Ok(self.operation(CancelAfter::new(target, duration, self.timer()?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opcore_pool::ManualPool;
    use opcore_protocol::{LifecycleState, ResultCode};

    struct Noop;

    impl Operation for Noop {}

    #[test]
    fn builds_outside_a_runtime_without_timers() {
        let pool = Arc::new(ManualPool::new());
        let kernel = KernelBuilder::new().pool(pool.clone()).build().unwrap();
        assert_eq!(kernel.pool().name(), "manual");
        assert_eq!(kernel.config().violation_policy, ViolationPolicy::Abort);
        assert!(matches!(
            kernel.delay(Duration::from_millis(1)),
            Err(OperationError::TimerUnavailable(_))
        ));

        let op = kernel.operation(Noop);
        op.start(None, None, None);
        pool.run_until_idle();
        assert_eq!(op.lifecycle_state(), LifecycleState::Completed);
        assert_eq!(op.result(), Some(ResultCode::Success));
    }

    #[test]
    fn tokio_flavour_requires_a_runtime() {
        let err = KernelBuilder::new()
            .pool_flavor(PoolFlavor::Tokio)
            .build()
            .err()
            .expect("no runtime available");
        assert!(err.to_string().contains("tokio runtime"));
    }

    #[test]
    fn zero_trace_buffer_is_rejected() {
        assert!(KernelBuilder::new().trace_buffer(0).build().is_err());
    }

    #[test]
    fn recorder_sees_records_from_kernel_operations() {
        let pool = Arc::new(ManualPool::new());
        let kernel = KernelBuilder::new()
            .pool(pool.clone())
            .record_traces(true)
            .build()
            .unwrap();
        let mut traces = kernel.subscribe_traces();
        let op = kernel.operation(Noop);
        op.start(None, None, None);
        pool.run_until_idle();

        let recorder = kernel.recorder().expect("recording enabled");
        assert!(!recorder.records_for(op.id()).is_empty());
        assert_eq!(traces.try_recv().unwrap().operation_id, op.id());
    }
}
