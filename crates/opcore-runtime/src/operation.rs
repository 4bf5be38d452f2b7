use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use opcore_protocol::{
    ActivityId, AmbientContext, ContractViolation, DispatcherState, LifecycleState, OperationId,
    PendingEvents, ResultCode, ThreadPool, TraceKind, TraceRecord, TraceSink,
};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::config::{OperationOptions, RuntimeConfig};
use crate::context::{Completion, OperationContext};
use crate::future::OperationFuture;
use crate::interceptor::{HookKind, Interception, Interceptor};
use crate::lock::{AcquireOutcome, AsyncLock};
use crate::node::{ChildCompletion, LockWaiter, OperationNode, OperationRef};
use crate::violation;

/// Behaviour plugged into an [`AsyncOperation`].
///
/// Every hook runs on the operation's apartment: never concurrently with
/// another hook of the same instance, and with no runtime lock held, so
/// hooks may call back into any public operation or lock API.
pub trait Operation: Sized + Send + 'static {
    /// Begin the work. The default completes immediately with success.
    fn on_start(&mut self, ctx: &mut OperationContext<'_, Self>) {
        ctx.complete(ResultCode::Success);
    }

    /// A cancel request was observed while operating. Calling
    /// `ctx.complete` here is how most derivations honour it.
    fn on_cancel(&mut self, _ctx: &mut OperationContext<'_, Self>) {}

    /// Return derivation state to its initial values. Runs synchronously
    /// inside [`AsyncOperation::reuse`].
    fn on_reuse(&mut self) {}

    /// Runs once per cycle right before the completion callback, on the
    /// parent's apartment when there is a parent.
    fn on_completed(&mut self, _completion: &Completion) {}
}

/// Called once per start cycle with the parent (if any) and this operation.
pub type CompletionCallback<D> = Box<dyn FnOnce(Option<&OperationRef>, &AsyncOperation<D>) + Send>;

pub(crate) type LockCallback<D> =
    Box<dyn FnOnce(&mut D, &mut OperationContext<'_, D>, bool, &AsyncLock) + Send>;

pub(crate) type DetachFn<D> = Box<dyn FnOnce(AsyncOperation<D>) + Send>;

pub(crate) struct LockWait<D: Operation> {
    pub(crate) lock: AsyncLock,
    pub(crate) callback: LockCallback<D>,
}

pub(crate) struct CoreState<D: Operation> {
    pub(crate) lifecycle: LifecycleState,
    pub(crate) dispatcher: DispatcherState,
    pub(crate) pending: PendingEvents,
    pub(crate) completed_children: VecDeque<Box<dyn ChildCompletion>>,
    pub(crate) activity_count: u32,
    pub(crate) locks_held: u32,
    pub(crate) result: Option<ResultCode>,
    pub(crate) cancel_requested: bool,
    pub(crate) parent: Option<OperationRef>,
    pub(crate) callback: Option<CompletionCallback<D>>,
    pub(crate) ambient: Option<AmbientContext>,
    /// Keeps the instance alive from start until finalization.
    pub(crate) self_ref: Option<AsyncOperation<D>>,
    pub(crate) lock_wait: Option<LockWait<D>>,
    pub(crate) apartment: Option<ThreadId>,
    pub(crate) detach: Option<DetachFn<D>>,
    pub(crate) waiters: Vec<oneshot::Sender<ResultCode>>,
}

impl<D: Operation> CoreState<D> {
    fn new() -> Self {
        Self {
            lifecycle: LifecycleState::Initialized,
            dispatcher: DispatcherState::Idle,
            pending: PendingEvents::empty(),
            completed_children: VecDeque::new(),
            activity_count: 0,
            locks_held: 0,
            result: None,
            cancel_requested: false,
            parent: None,
            callback: None,
            ambient: None,
            self_ref: None,
            lock_wait: None,
            apartment: None,
            detach: None,
            waiters: Vec::new(),
        }
    }

    /// Claims the dispatcher. True means the caller must queue a work item.
    pub(crate) fn mark_runnable(&mut self) -> bool {
        if self.dispatcher.is_scheduled() {
            return false;
        }
        self.dispatcher = DispatcherState::Runnable;
        true
    }

    pub(crate) fn start_pending(&self) -> bool {
        self.lifecycle == LifecycleState::Initialized && self.pending.contains(PendingEvents::START)
    }

    pub(crate) fn accepts_activities(&self) -> bool {
        matches!(
            self.lifecycle,
            LifecycleState::Operating | LifecycleState::Completing
        ) || self.start_pending()
    }

    pub(crate) fn set_lifecycle(&mut self, to: LifecycleState, fx: &mut Effects) {
        let from = self.lifecycle;
        self.lifecycle = to;
        fx.note(TraceKind::Lifecycle { from, to });
    }

    pub(crate) fn is_apartment_thread(&self) -> bool {
        self.dispatcher == DispatcherState::Running
            && self.apartment == Some(thread::current().id())
    }
}

/// Side effects gathered under the internal lock and applied after it is
/// released: trace records and the decision to queue a dispatcher.
pub(crate) struct Effects {
    activity: Option<ActivityId>,
    traces: Vec<TraceKind>,
    pub(crate) schedule: bool,
}

impl Effects {
    pub(crate) fn new<D: Operation>(state: &CoreState<D>) -> Self {
        Self {
            activity: state.ambient.as_ref().map(|ambient| ambient.activity_id),
            traces: Vec::new(),
            schedule: false,
        }
    }

    pub(crate) fn note(&mut self, kind: TraceKind) {
        self.traces.push(kind);
    }
}

pub(crate) struct Inner<D: Operation> {
    pub(crate) id: OperationId,
    pub(crate) pool: Arc<dyn ThreadPool>,
    pub(crate) config: RuntimeConfig,
    pub(crate) trace: Option<Arc<dyn TraceSink>>,
    pub(crate) interceptor: Option<Arc<dyn Interceptor>>,
    pub(crate) state: Mutex<CoreState<D>>,
    pub(crate) logic: Mutex<D>,
}

impl<D: Operation> Drop for Inner<D> {
    fn drop(&mut self) {
        let state = self.state.get_mut().lifecycle;
        if !state.is_at_rest() && !thread::panicking() {
            violation::raise(
                self.config.violation_policy,
                ContractViolation::DroppedInFlight { id: self.id, state },
            );
        }
    }
}

/// A reusable asynchronous operation.
///
/// The handle is cheap to clone. Public methods only record events and make
/// sure a pool thread is scheduled; derivation code runs later on that
/// thread, one event at a time.
pub struct AsyncOperation<D: Operation> {
    pub(crate) inner: Arc<Inner<D>>,
}

impl<D: Operation> Clone for AsyncOperation<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<D: Operation> fmt::Debug for AsyncOperation<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("AsyncOperation")
            .field("id", &self.inner.id)
            .field("lifecycle", &state.lifecycle)
            .field("dispatcher", &state.dispatcher)
            .field("activity_count", &state.activity_count)
            .field("locks_held", &state.locks_held)
            .finish()
    }
}

impl<D: Operation> AsyncOperation<D> {
    pub fn new(logic: D, pool: Arc<dyn ThreadPool>) -> Self {
        Self::with_options(logic, pool, OperationOptions::default())
    }

    pub fn with_options(logic: D, pool: Arc<dyn ThreadPool>, options: OperationOptions) -> Self {
        let OperationOptions {
            config,
            trace,
            interceptor,
        } = options;
        Self {
            inner: Arc::new(Inner {
                id: OperationId::new(),
                pool,
                config,
                trace,
                interceptor,
                state: Mutex::new(CoreState::new()),
                logic: Mutex::new(logic),
            }),
        }
    }

    pub fn id(&self) -> OperationId {
        self.inner.id
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.inner.state.lock().lifecycle
    }

    pub fn dispatcher_state(&self) -> DispatcherState {
        self.inner.state.lock().dispatcher
    }

    /// The recorded result. `None` until the operation reaches
    /// `CompletionPending`, even if `complete` was already accepted.
    pub fn result(&self) -> Option<ResultCode> {
        let state = self.inner.state.lock();
        match state.lifecycle {
            LifecycleState::CompletionPending | LifecycleState::Completed => state.result.clone(),
            _ => None,
        }
    }

    pub fn activity_count(&self) -> u32 {
        self.inner.state.lock().activity_count
    }

    pub fn locks_held(&self) -> u32 {
        self.inner.state.lock().locks_held
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.inner.state.lock().cancel_requested
    }

    pub fn ambient(&self) -> Option<AmbientContext> {
        self.inner.state.lock().ambient.clone()
    }

    /// True on the thread currently draining this operation's events.
    pub fn is_in_apartment(&self) -> bool {
        self.inner.state.lock().is_apartment_thread()
    }

    pub fn operation_ref(&self) -> OperationRef {
        OperationRef::new(Arc::new(self.clone()))
    }

    /// Reads the derivation. Must not be called from this operation's own
    /// hooks, which already hold it.
    pub fn with_logic<R>(&self, f: impl FnOnce(&D) -> R) -> R {
        f(&*self.inner.logic.lock())
    }

    /// Mutates the derivation between cycles. Same restriction as
    /// [`with_logic`](Self::with_logic).
    pub fn with_logic_mut<R>(&self, f: impl FnOnce(&mut D) -> R) -> R {
        f(&mut *self.inner.logic.lock())
    }

    /// Begins a cycle. Returns at once; completion is always reported
    /// asynchronously through `callback`.
    pub fn start(
        &self,
        parent: Option<&OperationRef>,
        callback: Option<CompletionCallback<D>>,
        ambient: Option<AmbientContext>,
    ) {
        self.start_cycle(parent, callback, ambient, None);
    }

    /// [`start`](Self::start) without a parent or ambient override.
    pub fn start_with<F>(&self, callback: F)
    where
        F: FnOnce(Option<&OperationRef>, &AsyncOperation<D>) + Send + 'static,
    {
        self.start_cycle(None, Some(Box::new(callback)), None, None);
    }

    /// Starts a cycle and returns a future resolving to its result once the
    /// operation is `Completed`.
    pub fn start_async(
        &self,
        parent: Option<&OperationRef>,
        ambient: Option<AmbientContext>,
    ) -> OperationFuture {
        let (sender, receiver) = oneshot::channel();
        self.start_cycle(parent, None, ambient, Some(sender));
        OperationFuture::new(self.id(), receiver)
    }

    fn start_cycle(
        &self,
        parent: Option<&OperationRef>,
        callback: Option<CompletionCallback<D>>,
        ambient: Option<AmbientContext>,
        waiter: Option<oneshot::Sender<ResultCode>>,
    ) {
        let inherited = parent.and_then(OperationRef::ambient);
        if let Some(parent) = parent {
            parent.acquire_activities(1);
        }

        let fx = {
            let mut state = self.inner.state.lock();
            if state.lifecycle != LifecycleState::Initialized {
                self.violate(ContractViolation::InvalidState {
                    id: self.id(),
                    operation: "start",
                    state: state.lifecycle,
                });
            }
            if state.pending.contains(PendingEvents::START) {
                self.violate(ContractViolation::AlreadyStarted { id: self.id() });
            }
            state.self_ref = Some(self.clone());
            state.parent = parent.cloned();
            state.callback = callback;
            state.ambient = AmbientContext::resolve(ambient, inherited);
            state.waiters.extend(waiter);
            state.pending.insert(PendingEvents::START);
            let mut fx = Effects::new(&state);
            fx.schedule = state.mark_runnable();
            fx
        };

        debug!(
            operation_id = %self.id(),
            parent_id = ?parent.map(OperationRef::id),
            "start requested"
        );
        self.apply(fx);
    }

    /// Records the result. The first accepted call wins; later calls return
    /// false. A call on a never-started instance is ignored.
    pub fn complete(&self, result: ResultCode) -> bool {
        let fx = {
            let mut state = self.inner.state.lock();
            let accepting =
                state.lifecycle == LifecycleState::Operating || state.start_pending();
            if !accepting || state.result.is_some() {
                if state.lifecycle == LifecycleState::Initialized && !state.start_pending() {
                    warn!(operation_id = %self.id(), %result, "complete on an unstarted operation ignored");
                }
                return false;
            }
            trace!(operation_id = %self.id(), %result, "complete accepted");
            state.result = Some(result);
            state.pending.insert(PendingEvents::COMPLETE);
            let mut fx = Effects::new(&state);
            fx.schedule = state.mark_runnable();
            fx
        };
        self.apply(fx);
        true
    }

    /// Requests cancellation. Accepted once per cycle, between start and
    /// completion; an outstanding lock wait is aborted.
    pub fn cancel(&self) -> bool {
        let fx = {
            let mut state = self.inner.state.lock();
            let cancellable =
                state.lifecycle == LifecycleState::Operating || state.start_pending();
            if !cancellable || state.cancel_requested {
                return false;
            }
            state.cancel_requested = true;
            state.pending.insert(PendingEvents::CANCEL);
            let id = self.id();
            let alerted = state
                .lock_wait
                .as_ref()
                .is_some_and(|wait| wait.lock.cancel_acquire(id));
            if alerted {
                state.pending.insert(PendingEvents::LOCK_ALERTED);
            }
            let mut fx = Effects::new(&state);
            fx.note(TraceKind::CancelAccepted);
            fx.schedule = state.mark_runnable();
            fx
        };
        debug!(operation_id = %self.id(), "cancel accepted");
        self.apply(fx);
        true
    }

    /// Returns a completed (or never-started) instance to `Initialized` and
    /// runs the derivation's reset hook before returning.
    pub fn reuse(&self) {
        let fx = {
            let mut state = self.inner.state.lock();
            let at_rest = state.lifecycle == LifecycleState::Completed
                || (state.lifecycle == LifecycleState::Initialized
                    && !state.pending.contains(PendingEvents::START));
            if !at_rest {
                self.violate(ContractViolation::InvalidState {
                    id: self.id(),
                    operation: "reuse",
                    state: state.lifecycle,
                });
            }
            let dirty = if state.locks_held > 0 {
                Some(format!("{} lock(s) held", state.locks_held))
            } else if state.activity_count > 0 || !state.completed_children.is_empty() {
                Some(format!("{} activities outstanding", state.activity_count))
            } else if state.lock_wait.is_some() {
                Some("a lock acquisition outstanding".to_string())
            } else if !state.pending.is_empty() {
                Some(format!("pending events {:?}", state.pending))
            } else {
                None
            };
            if let Some(detail) = dirty {
                self.violate(ContractViolation::DirtyReuse {
                    id: self.id(),
                    detail,
                });
            }

            let mut fx = Effects::new(&state);
            if state.lifecycle != LifecycleState::Initialized {
                state.set_lifecycle(LifecycleState::Initialized, &mut fx);
            }
            state.result = None;
            state.cancel_requested = false;
            state.parent = None;
            state.callback = None;
            state.ambient = None;
            state.detach = None;
            state.waiters.clear();
            fx.note(TraceKind::Reused);
            fx
        };

        if self.hook_allowed(HookKind::Reuse) {
            self.inner.logic.lock().on_reuse();
            self.hook_finished(HookKind::Reuse);
        }
        debug!(operation_id = %self.id(), "operation reused");
        self.apply(fx);
    }

    pub fn acquire_activities(&self, count: u32) {
        let fx = {
            let mut state = self.inner.state.lock();
            if !state.accepts_activities() {
                self.violate(ContractViolation::InvalidState {
                    id: self.id(),
                    operation: "acquire_activities",
                    state: state.lifecycle,
                });
            }
            self.add_activities(&mut state, count);
            let mut fx = Effects::new(&state);
            fx.note(TraceKind::ActivityChanged {
                count: state.activity_count,
            });
            fx
        };
        self.apply(fx);
    }

    /// Like [`acquire_activities`](Self::acquire_activities) but reports an
    /// invalid state instead of failing.
    pub fn try_acquire_activities(&self, count: u32) -> bool {
        let fx = {
            let mut state = self.inner.state.lock();
            if !state.accepts_activities() {
                return false;
            }
            self.add_activities(&mut state, count);
            let mut fx = Effects::new(&state);
            fx.note(TraceKind::ActivityChanged {
                count: state.activity_count,
            });
            fx
        };
        self.apply(fx);
        true
    }

    /// Returns true when the count reached zero.
    pub fn release_activities(&self, count: u32) -> bool {
        let (fx, reached_zero) = {
            let mut state = self.inner.state.lock();
            if !state.accepts_activities() {
                self.violate(ContractViolation::InvalidState {
                    id: self.id(),
                    operation: "release_activities",
                    state: state.lifecycle,
                });
            }
            if count > state.activity_count {
                self.violate(ContractViolation::ActivityUnderflow {
                    id: self.id(),
                    requested: count,
                    outstanding: state.activity_count,
                });
            }
            state.activity_count -= count;
            let reached_zero = state.activity_count == 0;
            let mut fx = Effects::new(&state);
            fx.note(TraceKind::ActivityChanged {
                count: state.activity_count,
            });
            if reached_zero && state.lifecycle == LifecycleState::Completing {
                fx.schedule = state.mark_runnable();
            }
            (fx, reached_zero)
        };
        self.apply(fx);
        reached_zero
    }

    /// Requests `lock`. `on_acquired` runs on this apartment with `true` once
    /// the lock is owned, or with `false` if the wait was cancelled.
    pub fn acquire_lock<F>(&self, lock: &AsyncLock, on_acquired: F)
    where
        F: FnOnce(&mut D, &mut OperationContext<'_, D>, bool, &AsyncLock) + Send + 'static,
    {
        let fx = {
            let mut state = self.inner.state.lock();
            if !state.lifecycle.accepts_lock_operations() {
                self.violate(ContractViolation::InvalidState {
                    id: self.id(),
                    operation: "acquire_lock",
                    state: state.lifecycle,
                });
            }
            if state.lock_wait.is_some() {
                self.violate(ContractViolation::DuplicateLockAcquire { id: self.id() });
            }
            let outcome = match lock.acquire(Box::new(self.clone())) {
                Ok(outcome) => outcome,
                Err(violation) => self.violate(violation),
            };
            self.add_activities(&mut state, 1);
            state.lock_wait = Some(LockWait {
                lock: lock.clone(),
                callback: Box::new(on_acquired),
            });
            let mut fx = Effects::new(&state);
            fx.note(TraceKind::ActivityChanged {
                count: state.activity_count,
            });
            if outcome == AcquireOutcome::Granted {
                state.pending.insert(PendingEvents::LOCK_ACQUIRED);
                fx.schedule = state.mark_runnable();
            }
            fx
        };
        self.apply(fx);
    }

    pub fn release_lock(&self, lock: &AsyncLock) {
        let (fx, next) = {
            let mut state = self.inner.state.lock();
            if !state.lifecycle.accepts_lock_operations() {
                self.violate(ContractViolation::InvalidState {
                    id: self.id(),
                    operation: "release_lock",
                    state: state.lifecycle,
                });
            }
            if state.locks_held == 0 {
                self.violate(ContractViolation::NotLockOwner {
                    id: self.id(),
                    lock: lock.id(),
                });
            }
            let next = match lock.release(self.id()) {
                Ok(next) => next,
                Err(violation) => self.violate(violation),
            };
            state.locks_held -= 1;
            let mut fx = Effects::new(&state);
            fx.note(TraceKind::LockReleased { lock_id: lock.id() });
            (fx, next)
        };
        self.apply(fx);
        if let Some(next) = next {
            next.lock_granted();
        }
    }

    pub fn is_lock_owner(&self, lock: &AsyncLock) -> bool {
        let state = self.inner.state.lock();
        if !state.lifecycle.accepts_lock_operations() {
            self.violate(ContractViolation::InvalidState {
                id: self.id(),
                operation: "is_lock_owner",
                state: state.lifecycle,
            });
        }
        lock.owner() == Some(self.id())
    }

    fn add_activities(&self, state: &mut CoreState<D>, count: u32) {
        match state.activity_count.checked_add(count) {
            Some(total) => state.activity_count = total,
            None => self.violate(ContractViolation::ActivityOverflow {
                id: self.id(),
                requested: count,
                outstanding: state.activity_count,
            }),
        }
    }

    pub(crate) fn violate(&self, violation: ContractViolation) -> ! {
        violation::raise(self.inner.config.violation_policy, violation)
    }

    pub(crate) fn apply(&self, fx: Effects) {
        let Effects {
            activity,
            traces,
            schedule,
        } = fx;
        for kind in traces {
            if let TraceKind::Lifecycle { from, to } = &kind {
                debug!(operation_id = %self.id(), %from, %to, "lifecycle transition");
            }
            if let Some(sink) = &self.inner.trace {
                sink.record(TraceRecord::new(self.id(), activity, kind));
            }
        }
        if schedule {
            self.queue_dispatch();
        }
    }

    fn queue_dispatch(&self) {
        let this = self.clone();
        if let Err(error) = self
            .inner
            .pool
            .queue_work_item(Box::new(move || this.run_dispatcher()))
        {
            self.violate(ContractViolation::Unschedulable {
                id: self.id(),
                reason: error.to_string(),
            });
        }
    }

    pub(crate) fn hook_allowed(&self, hook: HookKind) -> bool {
        match &self.inner.interceptor {
            Some(interceptor) => {
                interceptor.before_hook(hook, &self.operation_ref()) == Interception::Proceed
            }
            None => true,
        }
    }

    pub(crate) fn hook_finished(&self, hook: HookKind) {
        if let Some(interceptor) = &self.inner.interceptor {
            interceptor.after_hook(hook, &self.operation_ref());
        }
    }

    /// Runs `f` against the derivation, on this operation's apartment.
    pub(crate) fn run_in_apartment<R>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut D, &mut OperationContext<'_, D>) -> R,
    ) -> R {
        if !self.is_in_apartment() {
            self.violate(ContractViolation::NotInApartment {
                id: self.id(),
                operation,
            });
        }
        let mut logic = self.inner.logic.lock();
        let mut ctx = OperationContext::new(self);
        f(&mut *logic, &mut ctx)
    }

    pub(crate) fn request_detach(&self, blocking: DetachFn<D>) {
        let mut state = self.inner.state.lock();
        if state.detach.is_some() {
            self.violate(ContractViolation::DoubleDetach { id: self.id() });
        }
        state.detach = Some(blocking);
    }

    /// Hook and callback for this operation's completion. The callback
    /// receives `parent`, which is `None` for a top-level operation.
    pub(crate) fn deliver_completion(&self, parent: Option<&OperationRef>) {
        let (completion, callback) = {
            let mut state = self.inner.state.lock();
            if state.lifecycle != LifecycleState::CompletionPending {
                self.violate(ContractViolation::IllegalEvent {
                    id: self.id(),
                    event: "sub_operation_completed",
                    state: state.lifecycle,
                });
            }
            let Some(result) = state.result.clone() else {
                self.violate(ContractViolation::InvalidState {
                    id: self.id(),
                    operation: "deliver_completion",
                    state: state.lifecycle,
                });
            };
            let completion = Completion {
                operation_id: self.id(),
                result,
                cancel_requested: state.cancel_requested,
                ambient: state.ambient.clone(),
            };
            (completion, state.callback.take())
        };

        if self.hook_allowed(HookKind::Completed) {
            self.inner.logic.lock().on_completed(&completion);
            self.hook_finished(HookKind::Completed);
        }
        if let Some(callback) = callback {
            callback(parent, self);
        }
    }

    pub(crate) fn acknowledge_completion(&self) {
        let fx = {
            let mut state = self.inner.state.lock();
            state.pending.insert(PendingEvents::COMPLETION_ACK);
            let mut fx = Effects::new(&state);
            fx.schedule = state.mark_runnable();
            fx
        };
        self.apply(fx);
    }
}

impl<D: Operation> OperationNode for AsyncOperation<D> {
    fn id(&self) -> OperationId {
        AsyncOperation::id(self)
    }

    fn lifecycle_state(&self) -> LifecycleState {
        AsyncOperation::lifecycle_state(self)
    }

    fn result(&self) -> Option<ResultCode> {
        AsyncOperation::result(self)
    }

    fn complete(&self, result: ResultCode) -> bool {
        AsyncOperation::complete(self, result)
    }

    fn cancel(&self) -> bool {
        AsyncOperation::cancel(self)
    }

    fn is_cancel_requested(&self) -> bool {
        AsyncOperation::is_cancel_requested(self)
    }

    fn ambient(&self) -> Option<AmbientContext> {
        AsyncOperation::ambient(self)
    }

    fn is_in_apartment(&self) -> bool {
        AsyncOperation::is_in_apartment(self)
    }

    fn acquire_activities(&self, count: u32) {
        AsyncOperation::acquire_activities(self, count)
    }

    fn try_acquire_activities(&self, count: u32) -> bool {
        AsyncOperation::try_acquire_activities(self, count)
    }

    fn release_activities(&self, count: u32) -> bool {
        AsyncOperation::release_activities(self, count)
    }

    fn enqueue_completed_child(&self, child: Box<dyn ChildCompletion>) {
        let fx = {
            let mut state = self.inner.state.lock();
            if !state.accepts_activities() {
                self.violate(ContractViolation::IllegalEvent {
                    id: AsyncOperation::id(self),
                    event: "sub_operation_completed",
                    state: state.lifecycle,
                });
            }
            trace!(
                operation_id = %AsyncOperation::id(self),
                child_id = %child.child_id(),
                "sub-operation completion queued"
            );
            state.completed_children.push_back(child);
            let mut fx = Effects::new(&state);
            fx.schedule = state.mark_runnable();
            fx
        };
        self.apply(fx);
    }
}

impl<D: Operation> ChildCompletion for AsyncOperation<D> {
    fn child_id(&self) -> OperationId {
        self.id()
    }

    fn deliver(&self, parent: &OperationRef) {
        self.deliver_completion(Some(parent));
        self.acknowledge_completion();
    }
}

impl<D: Operation> LockWaiter for AsyncOperation<D> {
    fn waiter_id(&self) -> OperationId {
        self.id()
    }

    fn lock_granted(&self) {
        let fx = {
            let mut state = self.inner.state.lock();
            if state.lock_wait.is_none() {
                self.violate(ContractViolation::IllegalEvent {
                    id: self.id(),
                    event: "lock_acquired",
                    state: state.lifecycle,
                });
            }
            state.pending.insert(PendingEvents::LOCK_ACQUIRED);
            let mut fx = Effects::new(&state);
            fx.schedule = state.mark_runnable();
            fx
        };
        self.apply(fx);
    }
}
