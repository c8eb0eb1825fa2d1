use crate::NodeError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Executable half of a node definition.
///
/// Returning `Ok(None)` (or `Ok(Some(Value::Null))`) means the node produced
/// nothing: the scheduler writes no token on its outgoing edges and the
/// branch simply ends there.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn execute(&self, ctx: ProcessorContext) -> Result<Option<Value>, NodeError>;
}

/// Everything a processor sees for one attempt.
#[derive(Clone)]
pub struct ProcessorContext {
    pub node_id: String,

    /// Inputs after interpolation, coercion and schema validation, with
    /// contract defaults already applied.
    pub inputs: HashMap<String, Value>,

    /// Raw instance configuration, for knobs outside the input schema.
    pub config: Map<String, Value>,

    /// Cancelled when the owning run is stopped. Long-running processors
    /// should select against it.
    pub cancellation: tokio_util::sync::CancellationToken,
}

impl ProcessorContext {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            inputs: HashMap::new(),
            config: Map::new(),
            cancellation: tokio_util::sync::CancellationToken::new(),
        }
    }

    /// Get a required input or fail.
    pub fn require_input(&self, name: &str) -> Result<&Value, NodeError> {
        self.inputs
            .get(name)
            .ok_or_else(|| NodeError::MissingInput(name.to_string()))
    }

    /// Get a required string input or fail with a typed error.
    pub fn require_str(&self, name: &str) -> Result<&str, NodeError> {
        self.require_input(name)?
            .as_str()
            .ok_or_else(|| NodeError::InvalidInput {
                field: name.to_string(),
                expected: "string".to_string(),
                actual: "other".to_string(),
            })
    }

    /// Optional string input, `None` when absent or not a string.
    pub fn optional_str(&self, name: &str) -> Option<&str> {
        self.inputs.get(name).and_then(|v| v.as_str())
    }

    /// Config value with a fallback.
    pub fn config_or(&self, name: &str, default: Value) -> Value {
        self.config.get(name).cloned().unwrap_or(default)
    }
}

#[async_trait]
impl<F, Fut> Processor for F
where
    F: Fn(ProcessorContext) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Option<Value>, NodeError>> + Send,
{
    async fn execute(&self, ctx: ProcessorContext) -> Result<Option<Value>, NodeError> {
        (self)(ctx).await
    }
}
