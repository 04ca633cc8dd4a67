use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use uuid::Uuid;

use tidecore::{Flow, RunError, Task, TaskError, TaskPayload, Value};

use crate::events::{EventBus, RunEvent, RunId};
use crate::executor::{CallResult, Executor, StateMap, TaskCall, TaskFuture};
use crate::registry::RunnableRegistry;

/// What to do when a task's result comes back failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Abort the run at the first failed task.
    StopOnFailure,
    /// Record the failure, mark dependents as upstream-failed and keep
    /// driving independent branches.
    ContinueOnFailure,
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub on_failure: FailurePolicy,
    /// Per-batch bound passed to [`Executor::wait`]. Backend-dependent;
    /// see the executor docs.
    pub task_timeout: Option<Duration>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            on_failure: FailurePolicy::StopOnFailure,
            task_timeout: None,
        }
    }
}

/// Terminal results of one flow run.
#[derive(Debug)]
pub struct RunOutcome {
    pub run_id: RunId,
    /// Terminal state per task, keyed by task name.
    pub states: HashMap<String, CallResult>,
    pub completed: usize,
    pub total: usize,
}

impl RunOutcome {
    pub fn state(&self, task: &str) -> Option<&CallResult> {
        self.states.get(task)
    }

    pub fn succeeded(&self) -> bool {
        self.states.values().all(|state| state.is_ok())
    }
}

/// Drives a flow through an executor, frontier by frontier.
///
/// Each round submits every task whose upstream tasks have reached a
/// terminal state, waits for the batch, binds keyed results into
/// downstream inputs and repeats until the graph is exhausted.
pub struct FlowRunner {
    registry: Arc<RunnableRegistry>,
    events: Arc<EventBus>,
    config: RunConfig,
}

impl FlowRunner {
    pub fn new(registry: Arc<RunnableRegistry>) -> FlowRunner {
        FlowRunner {
            registry,
            events: Arc::new(EventBus::new(1000)),
            config: RunConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub async fn run<E>(
        &self,
        flow: &Flow,
        parameters: StateMap,
        executor: &E,
    ) -> Result<RunOutcome, RunError>
    where
        E: Executor + ?Sized,
    {
        let run_id = Uuid::new_v4();
        let started_at = Instant::now();

        for name in flow.parameters(true).keys() {
            if !parameters.contains_key(name) {
                return Err(RunError::MissingParameter(name.clone()));
            }
        }

        let order = flow.sorted_tasks(None)?;
        let mut calls: HashMap<String, TaskCall> = HashMap::with_capacity(order.len());
        for task in &order {
            calls.insert(task.name().to_string(), self.build_call(task, &parameters)?);
        }

        let mut graph: DiGraph<String, ()> = DiGraph::new();
        let mut nodes: HashMap<String, NodeIndex> = HashMap::with_capacity(order.len());
        for task in &order {
            let idx = graph.add_node(task.name().to_string());
            nodes.insert(task.name().to_string(), idx);
        }
        for edge in flow.edges() {
            graph.add_edge(nodes[&edge.upstream_task], nodes[&edge.downstream_task], ());
        }

        tracing::info!(flow = %flow.slug(), %run_id, tasks = order.len(), "starting flow run");
        self.events.emit(RunEvent::FlowStarted {
            run_id,
            flow: flow.slug(),
            timestamp: Utc::now(),
        });

        let mut states: HashMap<String, CallResult> = HashMap::with_capacity(order.len());
        let mut pending: Vec<&Task> = order.clone();

        while !pending.is_empty() {
            let mut ready = Vec::new();
            let mut rest = Vec::new();
            for task in pending {
                let deps_done = graph
                    .neighbors_directed(nodes[task.name()], Direction::Incoming)
                    .all(|dep| states.contains_key(graph[dep].as_str()));
                if deps_done {
                    ready.push(task);
                } else {
                    rest.push(task);
                }
            }
            pending = rest;
            if ready.is_empty() {
                // a validated DAG cannot stall; bail rather than spin
                break;
            }

            let mut batch: Vec<(&Task, TaskFuture)> = Vec::with_capacity(ready.len());
            for task in ready {
                if let Some(failed) = self.failed_upstream(flow, task, &states) {
                    let error = TaskError::UpstreamFailed(failed);
                    self.emit_task_failed(run_id, task.name(), &error);
                    states.insert(task.name().to_string(), Err(error));
                    continue;
                }

                let mut inputs = StateMap::new();
                for edge in flow.edges_to(task.name()) {
                    if let Some(key) = edge.key {
                        if let Some(Ok(value)) = states.get(&edge.upstream_task) {
                            inputs.insert(key, value.clone());
                        }
                    }
                }

                self.events.emit(RunEvent::TaskStarted {
                    run_id,
                    task: task.name().to_string(),
                    timestamp: Utc::now(),
                });
                let future = executor.submit(calls[task.name()].clone(), inputs).await?;
                batch.push((task, future));
            }
            if batch.is_empty() {
                continue;
            }

            let (tasks, futures): (Vec<&Task>, Vec<TaskFuture>) = batch.into_iter().unzip();
            let results = executor.wait(futures, self.config.task_timeout).await?;
            for (task, result) in tasks.into_iter().zip(results) {
                match &result {
                    Ok(_) => {
                        tracing::debug!(task = task.name(), "task completed");
                        self.events.emit(RunEvent::TaskCompleted {
                            run_id,
                            task: task.name().to_string(),
                            timestamp: Utc::now(),
                        });
                    }
                    Err(error) => {
                        tracing::error!(task = task.name(), %error, "task failed");
                        self.emit_task_failed(run_id, task.name(), error);
                        if self.config.on_failure == FailurePolicy::StopOnFailure {
                            let error = error.clone();
                            states.insert(task.name().to_string(), result);
                            self.emit_flow_completed(run_id, false, started_at);
                            return Err(RunError::TaskFailed {
                                task: task.name().to_string(),
                                source: error,
                            });
                        }
                    }
                }
                states.insert(task.name().to_string(), result);
            }
        }

        let success = states.values().all(|state| state.is_ok());
        self.emit_flow_completed(run_id, success, started_at);
        tracing::info!(flow = %flow.slug(), %run_id, success, "flow run finished");
        Ok(RunOutcome {
            run_id,
            completed: states.values().filter(|state| state.is_ok()).count(),
            total: order.len(),
            states,
        })
    }

    /// Name of a failed direct upstream of `task`, if any.
    fn failed_upstream(
        &self,
        flow: &Flow,
        task: &Task,
        states: &HashMap<String, CallResult>,
    ) -> Option<String> {
        flow.edges_to(task.name())
            .into_iter()
            .find(|edge| matches!(states.get(&edge.upstream_task), Some(Err(_))))
            .map(|edge| edge.upstream_task)
    }

    fn build_call(&self, task: &Task, parameters: &StateMap) -> Result<TaskCall, RunError> {
        match task.payload() {
            TaskPayload::Parameter { default, .. } => {
                let value = parameters
                    .get(task.name())
                    .cloned()
                    .or_else(|| default.clone())
                    .unwrap_or(Value::Null);
                Ok(Arc::new(move |_ctx| {
                    let value = value.clone();
                    async move { Ok(value) }.boxed()
                }))
            }
            TaskPayload::Operation { op_type, config } => {
                let runnable = self.registry.create(op_type, config)?;
                Ok(Arc::new(move |ctx| {
                    let runnable = runnable.clone();
                    async move { runnable.run(ctx).await }.boxed()
                }))
            }
        }
    }

    fn emit_task_failed(&self, run_id: RunId, task: &str, error: &TaskError) {
        self.events.emit(RunEvent::TaskFailed {
            run_id,
            task: task.to_string(),
            error: error.to_string(),
            timestamp: Utc::now(),
        });
    }

    fn emit_flow_completed(&self, run_id: RunId, success: bool, started_at: Instant) {
        self.events.emit(RunEvent::FlowCompleted {
            run_id,
            success,
            duration_ms: started_at.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        });
    }
}
