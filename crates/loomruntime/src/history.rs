use chrono::{DateTime, Utc};
use loomcore::{ExecutionContext, Snapshot};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Maximum retained snapshots per run; oldest are evicted first.
pub const HISTORY_LIMIT: usize = 50;

/// Lineage record: which node produced a value and which upstream nodes the
/// value was derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceRecord {
    pub generated_by: String,
    pub source: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Snapshots and output provenance for time-travel debugging. The scheduler
/// informs the recorder of every node transition; nothing else tracks
/// lineage.
#[derive(Debug, Default)]
pub struct HistoryRecorder {
    provenance: HashMap<String, ProvenanceRecord>,
}

impl HistoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a timestamped shallow clone of the observable run state,
    /// evicting the oldest entries beyond the cap.
    pub fn record_delta(&self, ctx: &mut ExecutionContext) {
        ctx.history.push(Snapshot {
            timestamp: Utc::now(),
            node_states: ctx.node_states.clone(),
            edge_signals: ctx.edge_signals.clone(),
        });
        if ctx.history.len() > HISTORY_LIMIT {
            let excess = ctx.history.len() - HISTORY_LIMIT;
            ctx.history.drain(..excess);
        }
    }

    /// Build and retain a provenance record for `node_id` by collecting the
    /// `generatedBy` tags embedded in its input values.
    pub fn record_provenance(
        &mut self,
        node_id: &str,
        inputs: &HashMap<String, Value>,
    ) -> ProvenanceRecord {
        let mut source: Vec<String> = inputs
            .values()
            .filter_map(|value| value.get("generatedBy"))
            .filter_map(|tag| tag.as_str())
            .map(str::to_string)
            .collect();
        source.sort();
        source.dedup();

        let record = ProvenanceRecord {
            generated_by: node_id.to_string(),
            source,
            timestamp: Utc::now(),
        };
        self.provenance.insert(node_id.to_string(), record.clone());
        record
    }

    pub fn provenance(&self, node_id: &str) -> Option<&ProvenanceRecord> {
        self.provenance.get(node_id)
    }
}
