use async_trait::async_trait;

use tidecore::{TaskError, Value, CONST_OP_TYPE};

use crate::executor::CallContext;

/// Executable behavior behind an operation task.
///
/// Instances are produced by a [`crate::RunnableRegistry`] factory with
/// their configuration baked in; `run` receives the upstream results
/// bound to this task's keyword inputs plus a dispatch handle for
/// dynamically fanning out further work.
#[async_trait]
pub trait Runnable: Send + Sync {
    /// Operation type identifier (e.g. "transform.json").
    fn op_type(&self) -> &str;

    async fn run(&self, ctx: CallContext) -> Result<Value, TaskError>;
}

/// Builtin runnable backing constant tasks: yields its configured value.
pub struct ConstantRunnable {
    value: Value,
}

impl ConstantRunnable {
    pub fn new(value: Value) -> ConstantRunnable {
        ConstantRunnable { value }
    }
}

#[async_trait]
impl Runnable for ConstantRunnable {
    fn op_type(&self) -> &str {
        CONST_OP_TYPE
    }

    async fn run(&self, _ctx: CallContext) -> Result<Value, TaskError> {
        Ok(self.value.clone())
    }
}
