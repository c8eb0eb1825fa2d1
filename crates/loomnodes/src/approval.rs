use async_trait::async_trait;
use loomcore::{
    FieldSchema, NodeCategory, NodeContract, NodeError, Processor, ProcessorContext, SchemaKind,
};
use loomruntime::NodeDefinition;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

pub const HUMAN_APPROVAL_TYPE: &str = "human.approval";

/// A decision injected from outside the run.
#[derive(Debug, Clone)]
pub struct ApprovalDecision {
    pub approved: bool,
    pub reason: Option<String>,
    pub decided_by: Option<String>,
}

impl ApprovalDecision {
    pub fn approve() -> Self {
        Self {
            approved: true,
            reason: None,
            decided_by: None,
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            reason: Some(reason.into()),
            decided_by: None,
        }
    }
}

/// Shared rendezvous between suspended approval nodes and whoever answers
/// for the human. The processor parks a oneshot slot under its node id and
/// suspends; `resolve` wakes it. A run's branch genuinely waits here, there
/// is no auto-approval timer.
#[derive(Clone, Default)]
pub struct ApprovalGate {
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<ApprovalDecision>>>>,
}

impl ApprovalGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Node ids currently suspended on a decision.
    pub fn pending(&self) -> Vec<String> {
        let pending = self.pending.lock().expect("approval lock poisoned");
        pending.keys().cloned().collect()
    }

    /// Deliver a decision. Returns false when no node with this id is
    /// waiting (already decided, cancelled, or never suspended).
    pub fn resolve(&self, node_id: &str, decision: ApprovalDecision) -> bool {
        let sender = {
            let mut pending = self.pending.lock().expect("approval lock poisoned");
            pending.remove(node_id)
        };
        match sender {
            Some(tx) => tx.send(decision).is_ok(),
            None => false,
        }
    }

    fn register(&self, node_id: &str) -> oneshot::Receiver<ApprovalDecision> {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock().expect("approval lock poisoned");
        if pending.insert(node_id.to_string(), tx).is_some() {
            tracing::warn!(node = node_id, "replacing a pending approval slot");
        }
        rx
    }

    fn abandon(&self, node_id: &str) {
        let mut pending = self.pending.lock().expect("approval lock poisoned");
        pending.remove(node_id);
    }
}

/// Human-approval gate: suspends its branch until a decision arrives
/// through the `ApprovalGate`, or the run is stopped.
pub struct HumanApprovalProcessor {
    gate: ApprovalGate,
}

impl HumanApprovalProcessor {
    pub fn new(gate: ApprovalGate) -> Self {
        Self { gate }
    }
}

#[async_trait]
impl Processor for HumanApprovalProcessor {
    async fn execute(&self, ctx: ProcessorContext) -> Result<Option<Value>, NodeError> {
        let rx = self.gate.register(&ctx.node_id);
        tracing::info!(node = %ctx.node_id, "awaiting human approval");

        let decision = tokio::select! {
            _ = ctx.cancellation.cancelled() => {
                self.gate.abandon(&ctx.node_id);
                return Err(NodeError::Cancelled);
            }
            result = rx => result.map_err(|_| {
                NodeError::ExecutionFailed("approval slot dropped without a decision".to_string())
            })?,
        };

        let mut output = json!({
            "approved": decision.approved,
            "route": if decision.approved { "approved" } else { "rejected" },
        });
        if let Some(reason) = decision.reason {
            output["reason"] = Value::String(reason);
        }
        if let Some(decided_by) = decision.decided_by {
            output["decidedBy"] = Value::String(decided_by);
        }
        Ok(Some(output))
    }
}

pub fn human_approval_definition(gate: ApprovalGate) -> NodeDefinition {
    let contract = NodeContract::new(HUMAN_APPROVAL_TYPE, "Human Approval", NodeCategory::Human)
        .input(
            "subject",
            FieldSchema::new(SchemaKind::Any).describe("Value presented for review"),
        )
        .output("approved", FieldSchema::new(SchemaKind::Boolean))
        .output("route", FieldSchema::new(SchemaKind::String));

    NodeDefinition::new(contract, Arc::new(HumanApprovalProcessor::new(gate)))
}
