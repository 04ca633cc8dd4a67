use std::collections::HashMap;
use std::sync::Arc;

use tidecore::{RunError, Value, CONST_OP_TYPE};

use crate::runnable::{ConstantRunnable, Runnable};

/// Factory trait for instantiating runnables from an operation type and
/// its configuration.
pub trait RunnableFactory: Send + Sync {
    fn op_type(&self) -> &str;

    fn create(&self, config: &HashMap<String, Value>) -> Result<Arc<dyn Runnable>, RunError>;
}

/// Registry of available operation types.
pub struct RunnableRegistry {
    factories: HashMap<String, Arc<dyn RunnableFactory>>,
}

impl RunnableRegistry {
    pub fn new() -> RunnableRegistry {
        RunnableRegistry {
            factories: HashMap::new(),
        }
    }

    /// A registry pre-loaded with the builtin operations (currently just
    /// the constant task).
    pub fn with_builtins() -> RunnableRegistry {
        let mut registry = RunnableRegistry::new();
        registry.register(Arc::new(ConstantFactory));
        registry
    }

    pub fn register(&mut self, factory: Arc<dyn RunnableFactory>) {
        let op_type = factory.op_type().to_string();
        tracing::info!("registering operation type: {}", op_type);
        self.factories.insert(op_type, factory);
    }

    /// Instantiate a runnable for the given operation type.
    pub fn create(
        &self,
        op_type: &str,
        config: &HashMap<String, Value>,
    ) -> Result<Arc<dyn Runnable>, RunError> {
        let factory = self
            .factories
            .get(op_type)
            .ok_or_else(|| RunError::UnknownOperation(op_type.to_string()))?;
        factory.create(config)
    }

    pub fn op_types(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}

impl Default for RunnableRegistry {
    fn default() -> Self {
        Self::new()
    }
}

struct ConstantFactory;

impl RunnableFactory for ConstantFactory {
    fn op_type(&self) -> &str {
        CONST_OP_TYPE
    }

    /// A constant without a configured `value` yields null.
    fn create(&self, config: &HashMap<String, Value>) -> Result<Arc<dyn Runnable>, RunError> {
        let value = config.get("value").cloned().unwrap_or(Value::Null);
        Ok(Arc::new(ConstantRunnable::new(value)))
    }
}
