use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::{oneshot, Semaphore};

use tidecore::ExecutorError;

use crate::executor::{
    run_call, CallContext, Dispatch, Dispatcher, ExecutorScope, Executor, MapArgs, Mapped,
    Resolved, StateMap, TaskCall, TaskFuture,
};

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Upper bound on concurrently running top-level calls. Work fanned
    /// out from a worker context is not counted, which keeps a worker
    /// from deadlocking against the pool it runs on.
    pub max_parallel: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { max_parallel: 10 }
    }
}

/// Concurrent backend on the tokio runtime.
///
/// `start` opens a session whose parallelism budget is a semaphore;
/// `submit` spawns each call as its own task. Fan-out from inside a
/// running call is dispatched fire-and-forget on the worker's own handle.
/// `wait` enforces its timeout with the runtime clock; timing out leaves
/// dispatched work running in the background.
pub struct TokioExecutor {
    config: ExecutorConfig,
    session: Mutex<Option<TokioSpawner>>,
}

impl TokioExecutor {
    pub fn new(config: ExecutorConfig) -> TokioExecutor {
        TokioExecutor {
            config,
            session: Mutex::new(None),
        }
    }

    fn spawner(&self) -> Result<TokioSpawner, ExecutorError> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(ExecutorError::NotStarted)
    }
}

impl Default for TokioExecutor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

/// Session handle: cheap to clone into spawned workers.
#[derive(Clone)]
struct TokioSpawner {
    semaphore: Arc<Semaphore>,
}

#[async_trait]
impl Dispatch for TokioSpawner {
    async fn dispatch(&self, call: TaskCall, inputs: StateMap, detached: bool) -> TaskFuture {
        let (tx, rx) = oneshot::channel();
        let spawner = self.clone();
        let gate = (!detached).then(|| self.semaphore.clone());
        tokio::spawn(async move {
            let _permit = match gate {
                Some(semaphore) => semaphore.acquire_owned().await.ok(),
                None => None,
            };
            let ctx = CallContext {
                inputs,
                dispatcher: Dispatcher::new(Arc::new(spawner), true),
            };
            let result = run_call(call, ctx).await;
            let _ = tx.send(Resolved::State(result));
        });
        TaskFuture::pending(rx)
    }

    async fn dispatch_fanout(&self, call: TaskCall, batches: Vec<StateMap>) -> TaskFuture {
        let (tx, rx) = oneshot::channel();
        let spawner = self.clone();
        tokio::spawn(async move {
            let mut children = Vec::with_capacity(batches.len());
            for inputs in batches {
                children.push(spawner.dispatch(call.clone(), inputs, true).await);
            }
            let _ = tx.send(Resolved::Nested(children));
        });
        TaskFuture::pending(rx)
    }
}

#[async_trait]
impl Executor for TokioExecutor {
    fn start(&self) -> Result<ExecutorScope<'_>, ExecutorError> {
        let mut slot = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(ExecutorError::AlreadyStarted);
        }
        *slot = Some(TokioSpawner {
            semaphore: Arc::new(Semaphore::new(self.config.max_parallel)),
        });
        tracing::debug!(max_parallel = self.config.max_parallel, "executor session started");
        Ok(ExecutorScope::new(self))
    }

    fn shutdown(&self) {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = None;
        tracing::debug!("executor session closed");
    }

    async fn submit(&self, call: TaskCall, inputs: StateMap) -> Result<TaskFuture, ExecutorError> {
        let spawner = self.spawner()?;
        Ok(Dispatcher::new(Arc::new(spawner), false)
            .submit(call, inputs)
            .await)
    }

    async fn map(&self, call: TaskCall, upstream: MapArgs) -> Result<Mapped, ExecutorError> {
        let spawner = self.spawner()?;
        Ok(Dispatcher::new(Arc::new(spawner), false)
            .map(call, upstream)
            .await)
    }
}
