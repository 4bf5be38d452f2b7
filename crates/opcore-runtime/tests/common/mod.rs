#![allow(dead_code)]

use std::sync::Arc;

use opcore_events::TraceRecorder;
use opcore_pool::ManualPool;
use opcore_protocol::{OperationId, ResultCode};
use opcore_runtime::{
    AsyncLock, Completion, Operation, OperationContext, OperationOptions, ViolationPolicy,
};
use parking_lot::Mutex;

/// Completes in `on_start` with a fixed result.
#[derive(Debug)]
pub struct Immediate {
    pub result: ResultCode,
    pub starts: u32,
    pub resets: u32,
}

impl Default for Immediate {
    fn default() -> Self {
        Self {
            result: ResultCode::Success,
            starts: 0,
            resets: 0,
        }
    }
}

impl Operation for Immediate {
    fn on_start(&mut self, ctx: &mut OperationContext<'_, Self>) {
        self.starts += 1;
        ctx.complete(self.result.clone());
    }

    fn on_reuse(&mut self) {
        self.resets += 1;
    }
}

/// Stays operating until completed from outside; completes `Cancelled` when
/// a cancel is delivered.
#[derive(Debug, Default)]
pub struct Manual {
    pub starts: u32,
    pub cancels: u32,
    pub resets: u32,
    pub completions: Vec<Completion>,
}

impl Operation for Manual {
    fn on_start(&mut self, _ctx: &mut OperationContext<'_, Self>) {
        self.starts += 1;
    }

    fn on_cancel(&mut self, ctx: &mut OperationContext<'_, Self>) {
        self.cancels += 1;
        ctx.complete(ResultCode::Cancelled);
    }

    fn on_reuse(&mut self) {
        self.resets += 1;
    }

    fn on_completed(&mut self, completion: &Completion) {
        self.completions.push(completion.clone());
    }
}

/// Acquires `lock` on start and keeps it until told otherwise. A denied
/// acquisition completes the operation as cancelled.
pub struct Locker {
    pub lock: AsyncLock,
    pub log: Arc<Mutex<Vec<OperationId>>>,
    pub callbacks: u32,
    pub complete_on_grant: bool,
}

impl Locker {
    pub fn new(lock: &AsyncLock, log: &Arc<Mutex<Vec<OperationId>>>) -> Self {
        Self {
            lock: lock.clone(),
            log: log.clone(),
            callbacks: 0,
            complete_on_grant: false,
        }
    }
}

impl Operation for Locker {
    fn on_start(&mut self, ctx: &mut OperationContext<'_, Self>) {
        let lock = self.lock.clone();
        ctx.acquire_lock(&lock, |me, ctx, acquired, _lock| {
            me.callbacks += 1;
            if !acquired {
                ctx.complete(ResultCode::Cancelled);
                return;
            }
            me.log.lock().push(ctx.id());
            if me.complete_on_grant {
                ctx.complete(ResultCode::Success);
            }
        });
    }
}

pub fn manual_pool() -> Arc<ManualPool> {
    Arc::new(ManualPool::new())
}

pub fn traced(recorder: &Arc<TraceRecorder>) -> OperationOptions {
    OperationOptions::new().trace_sink(recorder.clone())
}

/// Violations panic instead of aborting, so `should_panic` can see them.
pub fn panicking() -> OperationOptions {
    OperationOptions::new().violation_policy(ViolationPolicy::Panic)
}
