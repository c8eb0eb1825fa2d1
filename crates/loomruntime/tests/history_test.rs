use loomcore::{ExecutionContext, GraphDefinition, NodeInstance};
use loomruntime::{HistoryRecorder, HISTORY_LIMIT};
use serde_json::json;
use std::collections::HashMap;

fn empty_ctx() -> ExecutionContext {
    let mut graph = GraphDefinition::new();
    graph.add_node(NodeInstance::new("only", "test.stub"));
    ExecutionContext::new(&graph)
}

#[test]
fn history_is_capped_with_oldest_evicted_first() {
    let recorder = HistoryRecorder::new();
    let mut ctx = empty_ctx();

    for i in 0..(HISTORY_LIMIT + 10) {
        ctx.edge_signals.insert("marker".to_string(), json!(i));
        recorder.record_delta(&mut ctx);
    }

    assert_eq!(ctx.history.len(), HISTORY_LIMIT);
    // The oldest ten snapshots are gone; the survivors start at 10.
    assert_eq!(ctx.history[0].edge_signals["marker"], json!(10));
    assert_eq!(
        ctx.history.last().unwrap().edge_signals["marker"],
        json!(HISTORY_LIMIT + 9)
    );
}

#[test]
fn provenance_collects_producer_tags() {
    let mut recorder = HistoryRecorder::new();

    let mut inputs = HashMap::new();
    inputs.insert("a".to_string(), json!({"v": 1, "generatedBy": "upstream-a"}));
    inputs.insert("b".to_string(), json!({"v": 2, "generatedBy": "upstream-b"}));
    inputs.insert("c".to_string(), json!({"v": 3, "generatedBy": "upstream-a"}));
    inputs.insert("plain".to_string(), json!(42));

    let record = recorder.record_provenance("sink", &inputs);
    assert_eq!(record.generated_by, "sink");
    assert_eq!(record.source, vec!["upstream-a", "upstream-b"]);

    assert_eq!(recorder.provenance("sink"), Some(&record));
    assert!(recorder.provenance("nobody").is_none());
}

#[test]
fn untagged_inputs_yield_empty_lineage() {
    let mut recorder = HistoryRecorder::new();
    let mut inputs = HashMap::new();
    inputs.insert("n".to_string(), json!("scalar"));

    let record = recorder.record_provenance("sink", &inputs);
    assert!(record.source.is_empty());
}
