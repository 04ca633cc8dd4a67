use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use tidecore::ExecutorError;

use crate::executor::{
    run_call, CallContext, Dispatch, Dispatcher, ExecutorScope, Executor, MapArgs, Mapped,
    StateMap, TaskCall, TaskFuture,
};

/// Deterministic in-order backend.
///
/// Every submission runs the call to completion before returning, so
/// futures come back already resolved and `wait` is immediate. Useful for
/// tests and debugging where reproducible ordering matters more than
/// concurrency. Because work finishes at submission time, `wait` timeouts
/// never fire on this backend.
pub struct SerialExecutor {
    started: AtomicBool,
}

impl SerialExecutor {
    pub fn new() -> SerialExecutor {
        SerialExecutor {
            started: AtomicBool::new(false),
        }
    }
}

impl Default for SerialExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
struct SerialSpawner;

#[async_trait]
impl Dispatch for SerialSpawner {
    async fn dispatch(&self, call: TaskCall, inputs: StateMap, _detached: bool) -> TaskFuture {
        let ctx = CallContext {
            inputs,
            dispatcher: Dispatcher::new(Arc::new(SerialSpawner), true),
        };
        TaskFuture::ready(run_call(call, ctx).await)
    }

    async fn dispatch_fanout(&self, call: TaskCall, batches: Vec<StateMap>) -> TaskFuture {
        let mut children = Vec::with_capacity(batches.len());
        for inputs in batches {
            children.push(self.dispatch(call.clone(), inputs, true).await);
        }
        TaskFuture::nested(children)
    }
}

#[async_trait]
impl Executor for SerialExecutor {
    fn start(&self) -> Result<ExecutorScope<'_>, ExecutorError> {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ExecutorError::AlreadyStarted);
        }
        tracing::debug!("serial executor session started");
        Ok(ExecutorScope::new(self))
    }

    fn shutdown(&self) {
        self.started.store(false, Ordering::SeqCst);
        tracing::debug!("serial executor session closed");
    }

    async fn submit(&self, call: TaskCall, inputs: StateMap) -> Result<TaskFuture, ExecutorError> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(ExecutorError::NotStarted);
        }
        Ok(Dispatcher::new(Arc::new(SerialSpawner), false)
            .submit(call, inputs)
            .await)
    }

    async fn map(&self, call: TaskCall, upstream: MapArgs) -> Result<Mapped, ExecutorError> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(ExecutorError::NotStarted);
        }
        Ok(Dispatcher::new(Arc::new(SerialSpawner), false)
            .map(call, upstream)
            .await)
    }
}
