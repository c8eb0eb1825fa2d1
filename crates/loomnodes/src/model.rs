use async_trait::async_trait;
use loomcore::{
    ChatMessage, ChatOptions, FieldSchema, ModelService, NodeCategory, NodeContract, NodeError,
    Processor, ProcessorContext, SchemaKind,
};
use loomruntime::NodeDefinition;
use serde_json::{json, Value};
use std::sync::Arc;

pub const MODEL_INVOKE_TYPE: &str = "agent.model";

/// Model-invocation node: builds a chat exchange from its inputs and
/// delegates to whatever `ModelService` the host wired in.
pub struct ModelInvokeProcessor {
    service: Arc<dyn ModelService>,
}

impl ModelInvokeProcessor {
    pub fn new(service: Arc<dyn ModelService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Processor for ModelInvokeProcessor {
    async fn execute(&self, ctx: ProcessorContext) -> Result<Option<Value>, NodeError> {
        let prompt = ctx.require_str("prompt")?;
        if prompt.trim().is_empty() {
            return Err(NodeError::MissingInput("prompt".to_string()));
        }

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = ctx.optional_str("system") {
            messages.push(ChatMessage::system(system));
        }
        messages.push(ChatMessage::user(prompt));

        let options = ChatOptions {
            model: ctx
                .inputs
                .get("model")
                .and_then(Value::as_str)
                .map(str::to_string),
            temperature: ctx.inputs.get("temperature").and_then(Value::as_f64),
            json_mode: ctx
                .inputs
                .get("jsonMode")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            seed: ctx.inputs.get("seed").and_then(Value::as_u64),
        };

        tracing::debug!(node = %ctx.node_id, model = ?options.model, "invoking model");
        let text = self.service.chat(&messages, &options).await?;

        Ok(Some(json!({ "text": text })))
    }
}

pub fn model_invoke_definition(service: Arc<dyn ModelService>) -> NodeDefinition {
    let contract = NodeContract::new(MODEL_INVOKE_TYPE, "Model Invocation", NodeCategory::Agent)
        .input(
            "prompt",
            FieldSchema::required(SchemaKind::String).describe("User prompt"),
        )
        .input(
            "system",
            FieldSchema::new(SchemaKind::String).describe("Optional system prompt"),
        )
        .input("model", FieldSchema::new(SchemaKind::String))
        .input("temperature", FieldSchema::new(SchemaKind::Number))
        .input("jsonMode", FieldSchema::new(SchemaKind::Boolean))
        .output("text", FieldSchema::new(SchemaKind::String))
        .capability("model-service");

    NodeDefinition::new(contract, Arc::new(ModelInvokeProcessor::new(service)))
}
