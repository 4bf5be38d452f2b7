use std::thread;

use opcore_protocol::{
    ContractViolation, Disposition, DispatcherState, EventKind, LifecycleState, ResultCode,
    TraceKind, resolve,
};
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::context::OperationContext;
use crate::interceptor::HookKind;
use crate::node::{ChildCompletion, OperationRef};
use crate::operation::{AsyncOperation, CoreState, Effects, LockWait, Operation};

/// One unit of work pulled off the event queue under the internal lock and
/// run after the lock is released.
enum Step<D: Operation> {
    /// Queue empty; the apartment was released.
    Idle,
    Start,
    Cancel,
    Lock {
        wait: LockWait<D>,
        acquired: bool,
    },
    SubOperation(Box<dyn ChildCompletion>),
    /// Entered `CompletionPending`.
    Deliver(Option<OperationRef>),
    Finalize {
        self_ref: Option<AsyncOperation<D>>,
        waiters: Vec<oneshot::Sender<ResultCode>>,
        result: ResultCode,
    },
}

impl<D: Operation> AsyncOperation<D> {
    /// Body of the pool work item: drains events until the queue is empty.
    pub(crate) fn run_dispatcher(self) {
        {
            let mut state = self.inner.state.lock();
            debug_assert_eq!(state.dispatcher, DispatcherState::Runnable);
            state.dispatcher = DispatcherState::Running;
            state.apartment = Some(thread::current().id());
        }
        trace!(operation_id = %self.id(), "apartment entered");

        loop {
            let (step, fx) = self.next_step();
            self.apply(fx);
            match step {
                Step::Idle => return,
                Step::Start => self.run_start(),
                Step::Cancel => self.run_cancel(),
                Step::Lock { wait, acquired } => self.run_lock_callback(wait, acquired),
                Step::SubOperation(child) => self.drain_child(child),
                Step::Deliver(Some(parent)) => {
                    parent.enqueue_completed_child(Box::new(self.clone()));
                }
                Step::Deliver(None) => {
                    self.deliver_completion(None);
                    self.acknowledge_completion();
                }
                Step::Finalize {
                    self_ref,
                    waiters,
                    result,
                } => {
                    debug!(operation_id = %self.id(), %result, "operation completed");
                    for waiter in waiters {
                        let _ = waiter.send(result.clone());
                    }
                    drop(self_ref);
                }
            }

            let detached = self.inner.state.lock().detach.take();
            if let Some(blocking) = detached {
                self.release_apartment();
                blocking(self);
                return;
            }
        }
    }

    fn next_step(&self) -> (Step<D>, Effects) {
        let mut state = self.inner.state.lock();
        let mut fx = Effects::new(&state);
        loop {
            let waiting = !state.completed_children.is_empty();
            let Some(event) = state.pending.take_next(waiting) else {
                if state.lifecycle == LifecycleState::Completing && state.activity_count == 0 {
                    let step = self.enter_completion_pending(&mut state, &mut fx);
                    return (step, fx);
                }
                state.dispatcher = if state.lock_wait.is_some() {
                    DispatcherState::WaitingOnLock
                } else {
                    DispatcherState::Idle
                };
                state.apartment = None;
                return (Step::Idle, fx);
            };

            if self.inner.config.trace_dispatch {
                fx.note(TraceKind::Dispatched { event });
            }
            trace!(
                operation_id = %self.id(),
                event = event.as_str(),
                state = %state.lifecycle,
                "draining event"
            );

            match resolve(state.lifecycle, event) {
                Disposition::Violation => self.violate(ContractViolation::IllegalEvent {
                    id: self.id(),
                    event: event.as_str(),
                    state: state.lifecycle,
                }),
                Disposition::Drop => continue,
                Disposition::Advance(to) => {
                    state.set_lifecycle(to, &mut fx);
                    match to {
                        LifecycleState::Operating => return (Step::Start, fx),
                        LifecycleState::Completed => {
                            let step = self.finalize(&mut state, &mut fx);
                            return (step, fx);
                        }
                        _ => continue,
                    }
                }
                Disposition::Deliver => {
                    let step = self.take_delivery(&mut state, &mut fx, event);
                    return (step, fx);
                }
            }
        }
    }

    fn take_delivery(&self, state: &mut CoreState<D>, fx: &mut Effects, event: EventKind) -> Step<D> {
        match event {
            EventKind::CancelRequested => Step::Cancel,
            EventKind::LockAcquired | EventKind::LockAlerted => {
                let Some(wait) = state.lock_wait.take() else {
                    self.violate(ContractViolation::IllegalEvent {
                        id: self.id(),
                        event: event.as_str(),
                        state: state.lifecycle,
                    });
                };
                state.activity_count = state.activity_count.saturating_sub(1);
                fx.note(TraceKind::ActivityChanged {
                    count: state.activity_count,
                });
                let acquired = event == EventKind::LockAcquired;
                if acquired {
                    state.locks_held += 1;
                    fx.note(TraceKind::LockGranted {
                        lock_id: wait.lock.id(),
                    });
                }
                Step::Lock { wait, acquired }
            }
            EventKind::SubOperationCompleted => match state.completed_children.pop_front() {
                Some(child) => Step::SubOperation(child),
                None => self.violate(ContractViolation::IllegalEvent {
                    id: self.id(),
                    event: event.as_str(),
                    state: state.lifecycle,
                }),
            },
            EventKind::StartRequested
            | EventKind::CompleteRequested
            | EventKind::CompletionAcknowledged => self.violate(ContractViolation::IllegalEvent {
                id: self.id(),
                event: event.as_str(),
                state: state.lifecycle,
            }),
        }
    }

    fn enter_completion_pending(&self, state: &mut CoreState<D>, fx: &mut Effects) -> Step<D> {
        if state.locks_held > 0 && !self.inner.config.permit_locks_held_on_completion {
            self.violate(ContractViolation::LocksHeldAtCompletion {
                id: self.id(),
                held: state.locks_held,
            });
        }
        state.set_lifecycle(LifecycleState::CompletionPending, fx);
        Step::Deliver(state.parent.clone())
    }

    fn finalize(&self, state: &mut CoreState<D>, fx: &mut Effects) -> Step<D> {
        let Some(result) = state.result.clone() else {
            self.violate(ContractViolation::InvalidState {
                id: self.id(),
                operation: "finalize",
                state: state.lifecycle,
            });
        };
        fx.note(TraceKind::Completed {
            result: result.clone(),
        });
        state.parent = None;
        state.ambient = None;
        state.callback = None;
        Step::Finalize {
            self_ref: state.self_ref.take(),
            waiters: std::mem::take(&mut state.waiters),
            result,
        }
    }

    fn run_start(&self) {
        if !self.hook_allowed(HookKind::Start) {
            return;
        }
        {
            let mut logic = self.inner.logic.lock();
            let mut ctx = OperationContext::new(self);
            logic.on_start(&mut ctx);
        }
        self.hook_finished(HookKind::Start);
    }

    fn run_cancel(&self) {
        if !self.hook_allowed(HookKind::Cancel) {
            return;
        }
        {
            let mut logic = self.inner.logic.lock();
            let mut ctx = OperationContext::new(self);
            logic.on_cancel(&mut ctx);
        }
        self.hook_finished(HookKind::Cancel);
    }

    fn run_lock_callback(&self, wait: LockWait<D>, acquired: bool) {
        let LockWait { lock, callback } = wait;
        trace!(operation_id = %self.id(), lock_id = %lock.id(), acquired, "lock callback");
        let mut logic = self.inner.logic.lock();
        let mut ctx = OperationContext::new(self);
        callback(&mut *logic, &mut ctx, acquired, &lock);
    }

    fn drain_child(&self, child: Box<dyn ChildCompletion>) {
        child.deliver(&self.operation_ref());
        let fx = {
            let mut state = self.inner.state.lock();
            if state.activity_count == 0 {
                self.violate(ContractViolation::ActivityUnderflow {
                    id: self.id(),
                    requested: 1,
                    outstanding: 0,
                });
            }
            state.activity_count -= 1;
            let mut fx = Effects::new(&state);
            fx.note(TraceKind::ActivityChanged {
                count: state.activity_count,
            });
            fx
        };
        self.apply(fx);
    }

    /// Gives up the apartment mid-drain so a detached closure can run on
    /// this thread. Leftover work is picked up by a fresh dispatcher.
    fn release_apartment(&self) {
        let fx = {
            let mut state = self.inner.state.lock();
            let has_work = !state.pending.is_empty()
                || !state.completed_children.is_empty()
                || (state.lifecycle == LifecycleState::Completing && state.activity_count == 0);
            state.apartment = None;
            state.dispatcher = if state.lock_wait.is_some() {
                DispatcherState::WaitingOnLock
            } else {
                DispatcherState::Idle
            };
            let mut fx = Effects::new(&state);
            if has_work {
                fx.schedule = state.mark_runnable();
            }
            fx
        };
        trace!(operation_id = %self.id(), "apartment detached");
        self.apply(fx);
    }
}
