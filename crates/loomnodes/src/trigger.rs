use async_trait::async_trait;
use loomcore::{
    FieldSchema, NodeCategory, NodeContract, NodeError, Processor, ProcessorContext, SchemaKind,
};
use loomruntime::NodeDefinition;
use serde_json::{json, Value};
use std::sync::Arc;

pub const MANUAL_TRIGGER_TYPE: &str = "trigger.manual";

/// Entry point node: emits its configured payload so a run can be seeded
/// from the graph itself.
pub struct ManualTriggerProcessor;

#[async_trait]
impl Processor for ManualTriggerProcessor {
    async fn execute(&self, ctx: ProcessorContext) -> Result<Option<Value>, NodeError> {
        let payload = ctx
            .inputs
            .get("payload")
            .cloned()
            .unwrap_or_else(|| json!({}));
        Ok(Some(payload))
    }
}

pub fn manual_trigger_definition() -> NodeDefinition {
    let contract = NodeContract::new(MANUAL_TRIGGER_TYPE, "Manual Trigger", NodeCategory::Custom)
        .input(
            "payload",
            FieldSchema::new(SchemaKind::Any).describe("Value emitted when the run starts"),
        )
        .output("payload", FieldSchema::new(SchemaKind::Any))
        .default_value("payload", json!({}));

    NodeDefinition::new(contract, Arc::new(ManualTriggerProcessor))
}
