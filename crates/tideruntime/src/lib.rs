//! Execution runtime for tide flows.
//!
//! This crate turns a validated task graph into scheduled computation:
//! the [`Executor`] abstraction over a concurrent backend, the
//! [`Runnable`] registry that attaches behavior to operation tasks, and
//! the [`FlowRunner`] loop that drives a flow through an executor.

mod events;
mod executor;
mod parallel;
mod registry;
mod runnable;
mod runner;
mod serial;

pub use events::{EventBus, RunEvent, RunId};
pub use executor::{
    CallContext, CallResult, Dispatcher, Executor, ExecutorScope, MapArgs, MapValue, Mapped,
    Resolved, StateMap, TaskCall, TaskFuture,
};
pub use parallel::{ExecutorConfig, TokioExecutor};
pub use registry::{RunnableFactory, RunnableRegistry};
pub use runnable::{ConstantRunnable, Runnable};
pub use runner::{FailurePolicy, FlowRunner, RunConfig, RunOutcome};
pub use serial::SerialExecutor;
