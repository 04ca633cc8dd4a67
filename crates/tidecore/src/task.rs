use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::value::Value;

/// Operation type of the builtin constant task produced by
/// [`Task::constant`].
pub const CONST_OP_TYPE: &str = "core.const";

/// A named unit of work inside a flow.
///
/// A task is metadata only: operations name an `op_type` that the runtime
/// resolves to executable behavior, parameters declare a flow input. The
/// slug defaults to the slugified name and must be unique within a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    name: String,
    slug: String,
    payload: TaskPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskPayload {
    Operation {
        op_type: String,
        #[serde(default)]
        config: HashMap<String, Value>,
    },
    Parameter {
        required: bool,
        default: Option<Value>,
    },
}

impl Task {
    /// Create an executable operation task.
    pub fn operation(
        name: impl Into<String>,
        op_type: impl Into<String>,
    ) -> Result<Task, GraphError> {
        let name = name.into();
        if name.is_empty() {
            return Err(GraphError::Construction("tasks must have a name".into()));
        }
        let slug = slug::slugify(&name);
        Ok(Task {
            name,
            slug,
            payload: TaskPayload::Operation {
                op_type: op_type.into(),
                config: HashMap::new(),
            },
        })
    }

    /// Create a parameter task. Parameters are required unless a default
    /// is attached with [`Task::with_default`].
    pub fn parameter(name: impl Into<String>) -> Result<Task, GraphError> {
        let name = name.into();
        if name.is_empty() {
            return Err(GraphError::Construction(
                "parameters must have a name".into(),
            ));
        }
        let slug = slug::slugify(&name);
        Ok(Task {
            name,
            slug,
            payload: TaskPayload::Parameter {
                required: true,
                default: None,
            },
        })
    }

    /// Wrap a bare value into a constant operation task.
    ///
    /// The name is derived from the value, so equal constants coincide on
    /// the same task.
    pub fn constant(value: impl Into<Value>) -> Task {
        let value = value.into();
        let mut hasher = DefaultHasher::new();
        format!("{value:?}").hash(&mut hasher);
        let name = format!("constant-{:016x}", hasher.finish());
        let slug = slug::slugify(&name);
        let mut config = HashMap::new();
        config.insert("value".to_string(), value);
        Task {
            name,
            slug,
            payload: TaskPayload::Operation {
                op_type: CONST_OP_TYPE.to_string(),
                config,
            },
        }
    }

    /// Override the derived slug. Slugs must stay unique within a flow;
    /// an override is how two tasks sharing a name can coexist with the
    /// flow's name-overwrite behavior.
    pub fn with_slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = slug.into();
        self
    }

    /// Attach a configuration entry. Has no effect on parameter tasks.
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        if let TaskPayload::Operation { config, .. } = &mut self.payload {
            config.insert(key.into(), value.into());
        }
        self
    }

    /// Attach a default value to a parameter task, marking it optional.
    /// Has no effect on operation tasks.
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        if let TaskPayload::Parameter { required, default } = &mut self.payload {
            *required = false;
            *default = Some(value.into());
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn payload(&self) -> &TaskPayload {
        &self.payload
    }

    /// Record kind string used in persisted flow documents.
    pub fn kind(&self) -> &'static str {
        match self.payload {
            TaskPayload::Operation { .. } => "operation",
            TaskPayload::Parameter { .. } => "parameter",
        }
    }

    pub fn is_parameter(&self) -> bool {
        matches!(self.payload, TaskPayload::Parameter { .. })
    }

    pub fn required(&self) -> bool {
        matches!(
            self.payload,
            TaskPayload::Parameter { required: true, .. }
        )
    }

    pub fn default(&self) -> Option<&Value> {
        match &self.payload {
            TaskPayload::Parameter { default, .. } => default.as_ref(),
            TaskPayload::Operation { .. } => None,
        }
    }

    pub fn op_type(&self) -> Option<&str> {
        match &self.payload {
            TaskPayload::Operation { op_type, .. } => Some(op_type),
            TaskPayload::Parameter { .. } => None,
        }
    }

    pub fn config(&self) -> Option<&HashMap<String, Value>> {
        match &self.payload {
            TaskPayload::Operation { config, .. } => Some(config),
            TaskPayload::Parameter { .. } => None,
        }
    }
}

/// Either a task or a bare value to be coerced into one, accepted where a
/// dependency is expected.
#[derive(Debug, Clone)]
pub enum TaskInput {
    Task(Task),
    Constant(Value),
}

impl TaskInput {
    /// Coerce into a task, wrapping bare values via [`Task::constant`].
    pub fn into_task(self) -> Task {
        match self {
            TaskInput::Task(task) => task,
            TaskInput::Constant(value) => Task::constant(value),
        }
    }
}

impl From<Task> for TaskInput {
    fn from(task: Task) -> Self {
        TaskInput::Task(task)
    }
}

impl From<Value> for TaskInput {
    fn from(value: Value) -> Self {
        TaskInput::Constant(value)
    }
}

impl From<&str> for TaskInput {
    fn from(s: &str) -> Self {
        TaskInput::Constant(Value::from(s))
    }
}

impl From<f64> for TaskInput {
    fn from(n: f64) -> Self {
        TaskInput::Constant(Value::from(n))
    }
}

impl From<i64> for TaskInput {
    fn from(n: i64) -> Self {
        TaskInput::Constant(Value::from(n))
    }
}

impl From<bool> for TaskInput {
    fn from(b: bool) -> Self {
        TaskInput::Constant(Value::from(b))
    }
}
