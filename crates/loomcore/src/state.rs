use crate::{FailureKind, GraphDefinition, RunId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Aggregate status of one run. Individual node failures do not flip the
/// run to `Failed`; callers inspect node states for real outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    Running,
    Paused,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Ready,
    Working,
    Completed,
    Error,
    Skipped,
}

impl NodeStatus {
    /// Terminal states count toward settlement.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Skipped)
    }
}

/// Last failure recorded against a node, branchable by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl NodeFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Mutable per-node execution record. Created `Pending` at graph load and
/// mutated exclusively by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRunState {
    pub id: String,
    pub status: NodeStatus,
    /// Resolved inputs cached across retries so upstream tokens do not have
    /// to be re-resolved after a failed attempt.
    #[serde(default)]
    pub input_buffer: HashMap<String, Value>,
    pub output: Option<Value>,
    pub error: Option<NodeFailure>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    /// Attempt counter, reserved for loop/re-entry support.
    pub execution_version: u32,
}

impl NodeRunState {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: NodeStatus::Pending,
            input_buffer: HashMap::new(),
            output: None,
            error: None,
            started_at: None,
            finished_at: None,
            retry_count: 0,
            execution_version: 0,
        }
    }
}

/// Timestamped shallow clone of the run's observable state, kept for
/// time-travel inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub node_states: HashMap<String, NodeRunState>,
    pub edge_signals: HashMap<String, Value>,
}

/// The whole mutable state of one run. Owned by the scheduler while a run
/// is ticking; observers only ever see cloned snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub run_id: RunId,
    pub status: RunStatus,
    /// Global blackboard, writable by the run's owner.
    pub memory: HashMap<String, Value>,
    /// Read-only configuration (secrets, feature flags).
    pub environment: HashMap<String, Value>,
    pub node_states: HashMap<String, NodeRunState>,
    /// Single-slot mailbox per edge: the most recent undelivered token.
    /// A second write before consumption overwrites the first.
    pub edge_signals: HashMap<String, Value>,
    pub history: Vec<Snapshot>,
}

impl ExecutionContext {
    pub fn new(graph: &GraphDefinition) -> Self {
        let node_states = graph
            .nodes
            .iter()
            .map(|n| (n.id.clone(), NodeRunState::new(&n.id)))
            .collect();

        Self {
            run_id: Uuid::new_v4(),
            status: RunStatus::Idle,
            memory: HashMap::new(),
            environment: HashMap::new(),
            node_states,
            edge_signals: HashMap::new(),
            history: Vec::new(),
        }
    }

    pub fn node(&self, id: &str) -> Option<&NodeRunState> {
        self.node_states.get(id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut NodeRunState> {
        self.node_states.get_mut(id)
    }

    /// True once every node has reached a terminal status.
    pub fn all_nodes_settled(&self) -> bool {
        self.node_states.values().all(|s| s.status.is_settled())
    }
}
