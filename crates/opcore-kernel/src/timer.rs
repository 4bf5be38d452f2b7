use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use opcore_protocol::ResultCode;
use opcore_runtime::{AsyncOperation, Operation, OperationContext, OperationRef};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

/// One armed tokio sleep per cycle, held as an activity of the owning
/// operation so the cycle cannot finalize while the sleep may still fire.
///
/// Firing and disarming race on a per-cycle claim; the winner releases the
/// activity, the loser does nothing.
struct TimerSlot {
    timer: Handle,
    claim: Option<Arc<AtomicBool>>,
    task: Option<JoinHandle<()>>,
}

impl TimerSlot {
    fn new(timer: Handle) -> Self {
        Self {
            timer,
            claim: None,
            task: None,
        }
    }

    fn arm<D, F>(&mut self, ctx: &OperationContext<'_, D>, duration: Duration, on_fire: F)
    where
        D: Operation,
        F: FnOnce(&AsyncOperation<D>) + Send + 'static,
    {
        let claim = Arc::new(AtomicBool::new(false));
        ctx.acquire_activities(1);
        let operation = ctx.operation().clone();
        let fire = claim.clone();
        self.task = Some(self.timer.spawn(async move {
            tokio::time::sleep(duration).await;
            if !fire.swap(true, Ordering::AcqRel) {
                on_fire(&operation);
                operation.release_activities(1);
            }
        }));
        self.claim = Some(claim);
    }

    /// True when the timer had not fired yet and is now stopped.
    fn disarm<D: Operation>(&mut self, ctx: &OperationContext<'_, D>) -> bool {
        let Some(claim) = &self.claim else {
            return false;
        };
        if claim.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
        ctx.release_activities(1);
        true
    }

    fn reset(&mut self) {
        self.claim = None;
        self.task = None;
    }
}

/// Completes with success after a fixed delay, or `Cancelled` if cancelled
/// first.
pub struct Delay {
    duration: Duration,
    slot: TimerSlot,
}

impl Delay {
    pub fn new(duration: Duration, timer: Handle) -> Self {
        Self {
            duration,
            slot: TimerSlot::new(timer),
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl Operation for Delay {
    fn on_start(&mut self, ctx: &mut OperationContext<'_, Self>) {
        debug!(operation_id = %ctx.id(), duration = ?self.duration, "delay armed");
        self.slot.arm(ctx, self.duration, |operation| {
            operation.complete(ResultCode::Success);
        });
    }

    fn on_cancel(&mut self, ctx: &mut OperationContext<'_, Self>) {
        if self.slot.disarm(ctx) {
            ctx.complete(ResultCode::Cancelled);
        }
    }

    fn on_reuse(&mut self) {
        self.slot.reset();
    }
}

/// Cancels `target` once the delay elapses, then completes with success.
/// Cancelling the watchdog itself leaves the target alone.
pub struct CancelAfter {
    target: OperationRef,
    duration: Duration,
    slot: TimerSlot,
    accepted: Arc<AtomicBool>,
}

impl CancelAfter {
    pub fn new(target: OperationRef, duration: Duration, timer: Handle) -> Self {
        Self {
            target,
            duration,
            slot: TimerSlot::new(timer),
            accepted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn target(&self) -> &OperationRef {
        &self.target
    }

    /// Whether the target accepted the cancel this watchdog sent.
    pub fn target_cancelled(&self) -> bool {
        self.accepted.load(Ordering::Acquire)
    }
}

impl Operation for CancelAfter {
    fn on_start(&mut self, ctx: &mut OperationContext<'_, Self>) {
        let target = self.target.clone();
        let accepted = self.accepted.clone();
        self.slot.arm(ctx, self.duration, move |operation| {
            let cancelled = target.cancel();
            debug!(target_id = %target.id(), cancelled, "watchdog fired");
            accepted.store(cancelled, Ordering::Release);
            operation.complete(ResultCode::Success);
        });
    }

    fn on_cancel(&mut self, ctx: &mut OperationContext<'_, Self>) {
        if self.slot.disarm(ctx) {
            ctx.complete(ResultCode::Cancelled);
        }
    }

    fn on_reuse(&mut self) {
        self.slot.reset();
        self.accepted.store(false, Ordering::Release);
    }
}
