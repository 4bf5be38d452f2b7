use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, ensure};
use clap::{Parser, ValueEnum};
use opcore::prelude::*;
use opcore::runtime::ViolationPolicy;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Scenario {
    /// Many operations queue on one lock.
    LockContention,
    /// One parent starts many children and waits for all of them.
    FanOut,
    /// Long delays cancelled by watchdogs.
    Cancel,
    All,
}

#[derive(Debug, Parser)]
#[command(name = "opcored")]
#[command(about = "Runs opcore scenario workloads and logs their traces")]
struct Cli {
    #[arg(long, value_enum, default_value = "all")]
    scenario: Scenario,
    /// Operations per scenario.
    #[arg(long, default_value_t = 64)]
    operations: usize,
    /// Worker threads for the dedicated pool.
    #[arg(long)]
    workers: Option<usize>,
    #[arg(long, default_value_t = 4096)]
    trace_buffer: usize,
    /// Panic instead of aborting on a contract violation.
    #[arg(long)]
    panic_on_violation: bool,
    #[arg(long, default_value = "info")]
    log_filter: String,
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_filter).context("invalid --log-filter")?;
    if cli.json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).compact().init();
    }

    let mut builder = KernelBuilder::new()
        .record_traces(true)
        .trace_buffer(cli.trace_buffer);
    if let Some(workers) = cli.workers {
        builder = builder.worker_threads(workers);
    }
    if cli.panic_on_violation {
        builder = builder.violation_policy(ViolationPolicy::Panic);
    }
    let kernel = builder.build().context("failed to build kernel")?;

    let mut traces = kernel.subscribe_traces();
    let trace_task = tokio::spawn(async move {
        loop {
            match traces.recv().await {
                Ok(record) => debug!(
                    operation_id = %record.operation_id,
                    kind = record.kind.name(),
                    "trace"
                ),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "trace subscriber lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let operations = cli.operations.max(1);
    let scenarios = match cli.scenario {
        Scenario::All => vec![Scenario::LockContention, Scenario::FanOut, Scenario::Cancel],
        one => vec![one],
    };
    for scenario in scenarios {
        let started = Instant::now();
        match scenario {
            Scenario::LockContention => lock_contention(&kernel, operations).await?,
            Scenario::FanOut => fan_out(&kernel, operations).await?,
            Scenario::Cancel => cancel(&kernel, operations).await?,
            Scenario::All => {}
        }
        info!(
            ?scenario,
            operations,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "scenario complete"
        );
    }

    if let Some(recorder) = kernel.recorder() {
        let mut histogram: Vec<_> = recorder.kind_histogram().into_iter().collect();
        histogram.sort();
        for (kind, count) in histogram {
            info!(kind, count, "trace summary");
        }
    }

    trace_task.abort();
    if let Err(error) = trace_task.await {
        if !error.is_cancelled() {
            warn!(%error, "trace task stopped");
        }
    }

    Ok(())
}

struct Contender {
    lock: AsyncLock,
    entered: Arc<AtomicUsize>,
}

impl Operation for Contender {
    fn on_start(&mut self, ctx: &mut OperationContext<'_, Self>) {
        let lock = self.lock.clone();
        ctx.acquire_lock(&lock, |me, ctx, acquired, lock| {
            if !acquired {
                ctx.complete(ResultCode::Cancelled);
                return;
            }
            me.entered.fetch_add(1, Ordering::SeqCst);
            ctx.release_lock(lock);
            ctx.complete(ResultCode::Success);
        });
    }
}

async fn lock_contention(kernel: &Kernel, operations: usize) -> Result<()> {
    let lock = kernel.lock("contended");
    let entered = Arc::new(AtomicUsize::new(0));
    let contenders: Vec<_> = (0..operations)
        .map(|_| {
            kernel.operation(Contender {
                lock: lock.clone(),
                entered: entered.clone(),
            })
        })
        .collect();

    let pending: Vec<_> = contenders
        .iter()
        .map(|op| op.start_async(None, None))
        .collect();
    for future in pending {
        let result = future.await?;
        ensure!(result.is_success(), "contender finished with {result:?}");
    }

    ensure!(
        entered.load(Ordering::SeqCst) == operations,
        "only {} of {operations} contenders entered the lock",
        entered.load(Ordering::SeqCst)
    );
    ensure!(!lock.is_locked(), "lock still owned after every contender finished");
    Ok(())
}

struct Leaf;

impl Operation for Leaf {}

struct Parent {
    children: Vec<AsyncOperation<Leaf>>,
    delivered: usize,
}

impl Operation for Parent {
    fn on_start(&mut self, ctx: &mut OperationContext<'_, Self>) {
        for child in &self.children {
            ctx.start_child(child, |me, _ctx, _child| me.delivered += 1);
        }
        ctx.complete(ResultCode::Success);
    }
}

async fn fan_out(kernel: &Kernel, operations: usize) -> Result<()> {
    let children = (0..operations).map(|_| kernel.operation(Leaf)).collect();
    let parent = kernel.operation(Parent {
        children,
        delivered: 0,
    });

    let result = parent.start_async(None, None).await?;
    ensure!(result.is_success(), "parent finished with {result:?}");
    let delivered = parent.with_logic(|logic| logic.delivered);
    ensure!(
        delivered == operations,
        "parent saw {delivered} of {operations} children"
    );
    Ok(())
}

async fn cancel(kernel: &Kernel, operations: usize) -> Result<()> {
    let mut delays = Vec::with_capacity(operations);
    let mut watchdogs = Vec::with_capacity(operations);
    for index in 0..operations {
        let delay = kernel.delay(Duration::from_secs(60))?;
        let done = delay.start_async(None, None);
        let watchdog = kernel.cancel_after(
            delay.operation_ref(),
            Duration::from_millis(5 + (index % 10) as u64),
        )?;
        let fired = watchdog.start_async(None, None);
        delays.push((delay, done));
        watchdogs.push((watchdog, fired));
    }

    for (watchdog, fired) in watchdogs {
        ensure!(fired.await?.is_success(), "watchdog {} failed", watchdog.id());
        ensure!(
            watchdog.with_logic(|logic| logic.target_cancelled()),
            "watchdog {} did not cancel its target",
            watchdog.id()
        );
    }
    for (delay, done) in delays {
        let result = done.await?;
        ensure!(result.is_cancelled(), "delay {} finished with {result:?}", delay.id());
    }
    Ok(())
}
