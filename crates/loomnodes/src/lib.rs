//! Built-in node library
//!
//! Standard node definitions: triggers, model invocation, conditional
//! routing, and human approval. Everything here is a plain `NodeDefinition`
//! conforming to the registry contract; the scheduler has no knowledge of
//! these types.

mod approval;
mod model;
mod router;
mod trigger;

pub use approval::{
    human_approval_definition, ApprovalDecision, ApprovalGate, HumanApprovalProcessor,
    HUMAN_APPROVAL_TYPE,
};
pub use model::{model_invoke_definition, ModelInvokeProcessor, MODEL_INVOKE_TYPE};
pub use router::{router_definition, Comparator, RouterProcessor, ROUTER_TYPE};
pub use trigger::{manual_trigger_definition, ManualTriggerProcessor, MANUAL_TRIGGER_TYPE};

use loomcore::ModelService;
use loomruntime::NodeRegistry;
use std::sync::Arc;

/// Register all built-in node types with a registry.
pub fn register_builtins(
    registry: &NodeRegistry,
    model_service: Arc<dyn ModelService>,
    approval_gate: ApprovalGate,
) {
    registry.register(manual_trigger_definition());
    registry.register(model_invoke_definition(model_service));
    registry.register(router_definition());
    registry.register(human_approval_definition(approval_gate));
}
