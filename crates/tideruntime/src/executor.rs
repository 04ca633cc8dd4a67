use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::oneshot;

use tidecore::{ExecutorError, TaskError, Value};

/// Task run-states keyed by name, as passed along edges and into calls.
pub type StateMap = HashMap<String, Value>;

/// Terminal result of one scheduled call. Worker-side failures land here,
/// never at the submission site.
pub type CallResult = Result<Value, TaskError>;

/// A unit of schedulable work: resolved inputs in, state out.
pub type TaskCall = Arc<dyn Fn(CallContext) -> BoxFuture<'static, CallResult> + Send + Sync>;

/// Context handed to every scheduled call.
pub struct CallContext {
    /// Upstream results bound to this call's keyword inputs.
    pub inputs: StateMap,
    /// Dispatch capability bound to the current worker context. Work
    /// fanned out from inside a running call must go through this handle,
    /// never through the top-level executor.
    pub dispatcher: Dispatcher,
}

impl CallContext {
    /// Fetch a required input or fail the call.
    pub fn require_input(&self, name: &str) -> Result<&Value, TaskError> {
        self.inputs
            .get(name)
            .ok_or_else(|| TaskError::MissingInput(name.to_string()))
    }
}

/// What a [`TaskFuture`] resolves to: either a final state, or — on the
/// map path — the list of per-element futures.
#[derive(Debug)]
pub enum Resolved {
    State(CallResult),
    Nested(Vec<TaskFuture>),
}

/// Handle to the eventual result of one scheduled call. Resolving
/// consumes the handle; results needed in several places are cloned out
/// of [`Executor::wait`].
#[derive(Debug)]
pub struct TaskFuture {
    inner: FutureInner,
}

#[derive(Debug)]
enum FutureInner {
    Ready(Box<Resolved>),
    Channel(oneshot::Receiver<Resolved>),
}

impl TaskFuture {
    pub(crate) fn ready(result: CallResult) -> TaskFuture {
        TaskFuture {
            inner: FutureInner::Ready(Box::new(Resolved::State(result))),
        }
    }

    pub(crate) fn nested(children: Vec<TaskFuture>) -> TaskFuture {
        TaskFuture {
            inner: FutureInner::Ready(Box::new(Resolved::Nested(children))),
        }
    }

    pub(crate) fn pending(rx: oneshot::Receiver<Resolved>) -> TaskFuture {
        TaskFuture {
            inner: FutureInner::Channel(rx),
        }
    }

    /// Await one resolution step. A dropped worker surfaces as
    /// [`TaskError::Cancelled`].
    pub async fn resolve(self) -> Resolved {
        match self.inner {
            FutureInner::Ready(resolved) => *resolved,
            FutureInner::Channel(rx) => rx
                .await
                .unwrap_or(Resolved::State(Err(TaskError::Cancelled))),
        }
    }
}

/// Result of [`Executor::map`] or [`Dispatcher::map`].
///
/// Dispatched from the top level the fan-out is deferred: the future
/// resolves to the per-element futures once the coordinator has scheduled
/// them. Dispatched from inside a worker context the futures come back
/// directly.
pub enum Mapped {
    Deferred(TaskFuture),
    Inline(Vec<TaskFuture>),
}

impl Mapped {
    /// Resolve to the per-element futures list.
    pub async fn futures(self) -> Vec<TaskFuture> {
        match self {
            Mapped::Inline(futures) => futures,
            Mapped::Deferred(future) => match future.resolve().await {
                Resolved::Nested(futures) => futures,
                Resolved::State(result) => vec![TaskFuture::ready(result)],
            },
        }
    }

    /// Collapse into a single future; [`Executor::wait`] splices the
    /// per-element results back in positionally.
    pub fn into_future(self) -> TaskFuture {
        match self {
            Mapped::Deferred(future) => future,
            Mapped::Inline(futures) => TaskFuture::nested(futures),
        }
    }
}

/// One input to a mapped fan-out: distributed element-wise or broadcast
/// to every call.
#[derive(Debug, Clone)]
pub enum MapValue {
    Each(Vec<Value>),
    Fixed(Value),
}

pub type MapArgs = HashMap<String, MapValue>;

/// Expand a map-argument mapping into one input mapping per element.
/// Element-wise values zip to the shortest; fixed values repeat. With no
/// element-wise entry a single broadcast call is produced.
pub(crate) fn fan_out(args: &MapArgs) -> Vec<StateMap> {
    let count = args
        .values()
        .filter_map(|value| match value {
            MapValue::Each(items) => Some(items.len()),
            MapValue::Fixed(_) => None,
        })
        .min()
        .unwrap_or(1);
    (0..count)
        .map(|position| {
            args.iter()
                .map(|(key, value)| {
                    let element = match value {
                        MapValue::Each(items) => items[position].clone(),
                        MapValue::Fixed(item) => item.clone(),
                    };
                    (key.clone(), element)
                })
                .collect()
        })
        .collect()
}

/// Backend hook behind [`Dispatcher`]: schedules calls on whatever the
/// session is bound to.
#[async_trait]
pub(crate) trait Dispatch: Send + Sync {
    /// Schedule one call. `detached` marks fire-and-forget work fanned
    /// out from a worker context, which must not count against the
    /// session's parallelism budget.
    async fn dispatch(&self, call: TaskCall, inputs: StateMap, detached: bool) -> TaskFuture;

    /// Schedule the fan-out coordinator for a mapped dispatch; its future
    /// resolves to the per-element futures.
    async fn dispatch_fanout(&self, call: TaskCall, batches: Vec<StateMap>) -> TaskFuture;
}

/// Dispatch capability scoped to a context: the top-level session, or the
/// worker a call is currently running on.
///
/// Whether the handle is worker-bound is explicit state threaded through
/// [`CallContext`], not ambient detection: fan-out from a worker returns
/// its futures inline and is decoupled from the coordinator's own
/// completion tracking, so nested dispatch returns promptly without
/// waiting on results it did not request.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<dyn Dispatch>,
    in_worker: bool,
}

impl Dispatcher {
    pub(crate) fn new(inner: Arc<dyn Dispatch>, in_worker: bool) -> Dispatcher {
        Dispatcher { inner, in_worker }
    }

    /// True when this handle is bound to a running worker context.
    pub fn in_worker(&self) -> bool {
        self.in_worker
    }

    /// Schedule a single call.
    pub async fn submit(&self, call: TaskCall, inputs: StateMap) -> TaskFuture {
        self.inner.dispatch(call, inputs, self.in_worker).await
    }

    /// Fan a call out over `upstream`, one call per element.
    pub async fn map(&self, call: TaskCall, upstream: MapArgs) -> Mapped {
        let batches = fan_out(&upstream);
        if self.in_worker {
            let mut futures = Vec::with_capacity(batches.len());
            for inputs in batches {
                futures.push(self.inner.dispatch(call.clone(), inputs, true).await);
            }
            Mapped::Inline(futures)
        } else {
            Mapped::Deferred(self.inner.dispatch_fanout(call, batches).await)
        }
    }
}

/// Abstraction over a concurrent compute backend.
///
/// An executor is dormant until [`Executor::start`] opens a session; the
/// returned scope guard tears the session down when dropped, on every
/// exit path. `submit` and `map` schedule work without blocking; `wait`
/// is the single point where a caller suspends on backend computation.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Open a session against the backend. Fails if one is already open.
    fn start(&self) -> Result<ExecutorScope<'_>, ExecutorError>;

    /// Tear the session down. Invoked by the scope guard; in-flight work
    /// is left to finish in the background.
    fn shutdown(&self);

    /// Schedule a single call, failing with
    /// [`ExecutorError::NotStarted`] when no session is open. Errors
    /// raised by the call are captured into the returned future and only
    /// surface through [`Executor::wait`].
    async fn submit(&self, call: TaskCall, inputs: StateMap) -> Result<TaskFuture, ExecutorError>;

    /// Schedule one call per element of the mapped inputs. See
    /// [`Mapped`] for the deferred/inline split.
    async fn map(&self, call: TaskCall, upstream: MapArgs) -> Result<Mapped, ExecutorError>;

    /// Resolve the given futures to concrete results, in input order,
    /// splicing nested (mapped) futures in positionally. Does not require
    /// an open session; an empty input returns immediately.
    ///
    /// Timeout enforcement is backend-dependent — see the backend docs.
    /// Timing out never interrupts work already dispatched.
    async fn wait(
        &self,
        futures: Vec<TaskFuture>,
        timeout: Option<Duration>,
    ) -> Result<Vec<CallResult>, ExecutorError> {
        if futures.is_empty() {
            return Ok(Vec::new());
        }
        match timeout {
            Some(limit) => tokio::time::timeout(limit, gather(futures))
                .await
                .map_err(|_| ExecutorError::Timeout(limit)),
            None => Ok(gather(futures).await),
        }
    }
}

/// Session guard returned by [`Executor::start`]; dropping it closes the
/// session.
pub struct ExecutorScope<'a> {
    executor: &'a dyn Executor,
}

impl<'a> ExecutorScope<'a> {
    pub(crate) fn new(executor: &'a dyn Executor) -> ExecutorScope<'a> {
        ExecutorScope { executor }
    }

    pub async fn submit(
        &self,
        call: TaskCall,
        inputs: StateMap,
    ) -> Result<TaskFuture, ExecutorError> {
        self.executor.submit(call, inputs).await
    }

    pub async fn map(&self, call: TaskCall, upstream: MapArgs) -> Result<Mapped, ExecutorError> {
        self.executor.map(call, upstream).await
    }

    pub async fn wait(
        &self,
        futures: Vec<TaskFuture>,
        timeout: Option<Duration>,
    ) -> Result<Vec<CallResult>, ExecutorError> {
        self.executor.wait(futures, timeout).await
    }
}

impl Drop for ExecutorScope<'_> {
    fn drop(&mut self) {
        self.executor.shutdown();
    }
}

/// Repeated-resolution pass: unwrap every future, splicing nested
/// children in at their parent's position.
fn gather(futures: Vec<TaskFuture>) -> BoxFuture<'static, Vec<CallResult>> {
    async move {
        let mut results = Vec::with_capacity(futures.len());
        for future in futures {
            match future.resolve().await {
                Resolved::State(result) => results.push(result),
                Resolved::Nested(children) => results.extend(gather(children).await),
            }
        }
        results
    }
    .boxed()
}

/// Run a call, converting panics into a captured [`TaskError`].
pub(crate) async fn run_call(call: TaskCall, ctx: CallContext) -> CallResult {
    match AssertUnwindSafe(call(ctx)).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(TaskError::Panicked(panic_message(payload))),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
