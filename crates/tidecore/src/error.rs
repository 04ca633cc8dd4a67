use std::time::Duration;

use thiserror::Error;

/// Errors raised synchronously by graph construction and query operations.
///
/// Every invariant violation is reported at the mutating call that caused
/// it, never deferred to execution time.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("invalid component: {0}")]
    Construction(String),

    #[error("task \"{task}\" could not be added: a task with the slug \"{slug}\" already exists in this flow")]
    DuplicateSlug { task: String, slug: String },

    #[error("an edge into task \"{task}\" with key \"{key}\" already exists")]
    DuplicateKey { task: String, key: String },

    #[error("task \"{0}\" was not found in the flow")]
    NotFound(String),

    #[error("flow graph must be acyclic")]
    Cycle,
}

/// Worker-side failures, captured into a future's result slot rather than
/// raised at submission time.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaskError {
    #[error("task failed: {0}")]
    Failed(String),

    #[error("missing required input: {0}")]
    MissingInput(String),

    #[error("upstream task \"{0}\" failed")]
    UpstreamFailed(String),

    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("task was cancelled before completing")]
    Cancelled,
}

/// Errors raised while persisting or reconstructing a flow document.
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("document carries no full-fidelity payload; only safe reconstruction is possible")]
    TrustBoundary,

    #[error("malformed flow document: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid flow document: {0}")]
    Invalid(String),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Dispatch-layer errors raised synchronously by an executor.
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("executor must be started before dispatching work")]
    NotStarted,

    #[error("executor session is already started")]
    AlreadyStarted,

    #[error("wait timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors raised by the run-loop while driving a flow to completion.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("missing required parameter \"{0}\"")]
    MissingParameter(String),

    #[error("unknown operation type \"{0}\"")]
    UnknownOperation(String),

    #[error("task \"{task}\" failed: {source}")]
    TaskFailed {
        task: String,
        #[source]
        source: TaskError,
    },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),
}
