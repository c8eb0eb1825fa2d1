use loomcore::{
    ExecutionContext, FieldSchema, GraphDefinition, InterpolationErrorKind, NodeCategory,
    NodeContract, NodeInstance, NodeStatus, SchemaKind,
};
use loomruntime::{coerce, Interpolator};
use serde_json::{json, Value};
use std::collections::HashMap;

/// Context with the given nodes already completed with the given outputs.
fn ctx_with(outputs: &[(&str, Value)]) -> ExecutionContext {
    let mut graph = GraphDefinition::new();
    for (id, _) in outputs {
        graph.add_node(NodeInstance::new(*id, "test.stub"));
    }
    let mut ctx = ExecutionContext::new(&graph);
    for (id, value) in outputs {
        let state = ctx.node_mut(id).unwrap();
        state.status = NodeStatus::Completed;
        state.output = Some(value.clone());
    }
    ctx
}

#[test]
fn exact_match_preserves_type() {
    let ctx = ctx_with(&[("x", json!(42))]);
    let res = Interpolator::new().interpolate(&json!("{{x}}"), &ctx).unwrap();
    assert_eq!(res.value, json!(42));
}

#[test]
fn exact_match_preserves_structure() {
    let ctx = ctx_with(&[("x", json!({"items": [1, 2]}))]);
    let res = Interpolator::new()
        .interpolate(&json!("{{x.output.items}}"), &ctx)
        .unwrap();
    assert_eq!(res.value, json!([1, 2]));
}

#[test]
fn embedded_placeholder_stringifies() {
    let ctx = ctx_with(&[("x", json!(42))]);
    let res = Interpolator::new()
        .interpolate(&json!("n={{x}}"), &ctx)
        .unwrap();
    assert_eq!(res.value, json!("n=42"));
}

#[test]
fn unresolved_embedded_placeholder_becomes_empty() {
    let ctx = ctx_with(&[]);
    let res = Interpolator::new()
        .interpolate(&json!("hello {{ghost.output.name}}!"), &ctx)
        .unwrap();
    assert_eq!(res.value, json!("hello !"));
}

#[test]
fn unresolved_exact_match_is_an_error() {
    let ctx = ctx_with(&[]);
    let err = Interpolator::new()
        .interpolate(&json!("{{ghost.output}}"), &ctx)
        .unwrap_err();
    assert_eq!(err.kind, InterpolationErrorKind::MissingDependency);
}

#[test]
fn incomplete_node_is_missing_dependency() {
    let mut graph = GraphDefinition::new();
    graph.add_node(NodeInstance::new("slow", "test.stub"));
    let ctx = ExecutionContext::new(&graph);

    let err = Interpolator::new()
        .interpolate(&json!("{{slow.output}}"), &ctx)
        .unwrap_err();
    assert_eq!(err.kind, InterpolationErrorKind::MissingDependency);
}

#[test]
fn chained_field_access_and_fallthrough() {
    let ctx = ctx_with(&[("n", json!({"a": {"b": "deep"}}))]);
    let interp = Interpolator::new();

    let full = interp.interpolate(&json!("{{n.output.a.b}}"), &ctx).unwrap();
    assert_eq!(full.value, json!("deep"));

    // A first segment that is not output/status/error reads into the output.
    let short = interp.interpolate(&json!("{{n.a.b}}"), &ctx).unwrap();
    assert_eq!(short.value, json!("deep"));

    let missing = interp
        .interpolate(&json!("{{n.output.a.zzz}}"), &ctx)
        .unwrap_err();
    assert_eq!(missing.kind, InterpolationErrorKind::MissingDependency);
}

#[test]
fn status_and_error_roots_reflect_node_state() {
    let ctx = ctx_with(&[("x", json!("done"))]);
    let interp = Interpolator::new();

    // The status root serializes the node's actual state, not a literal.
    let status = interp.interpolate(&json!("{{x.status}}"), &ctx).unwrap();
    assert_eq!(
        status.value,
        serde_json::to_value(NodeStatus::Completed).unwrap()
    );

    let error = interp.interpolate(&json!("{{x.error}}"), &ctx).unwrap();
    assert_eq!(error.value, Value::Null);
}

#[test]
fn env_and_global_references() {
    let mut ctx = ctx_with(&[]);
    ctx.environment.insert("STAGE".to_string(), json!("prod"));
    ctx.memory
        .insert("counters".to_string(), json!({"runs": 7}));

    let interp = Interpolator::new();
    assert_eq!(
        interp.interpolate(&json!("{{$env.STAGE}}"), &ctx).unwrap().value,
        json!("prod")
    );
    assert_eq!(
        interp
            .interpolate(&json!("{{$global.counters.runs}}"), &ctx)
            .unwrap()
            .value,
        json!(7)
    );

    let err = interp
        .interpolate(&json!("{{$env.MISSING}}"), &ctx)
        .unwrap_err();
    assert_eq!(err.kind, InterpolationErrorKind::MissingDependency);
}

#[test]
fn syntax_errors() {
    let ctx = ctx_with(&[]);
    let interp = Interpolator::new();

    let empty = interp.interpolate(&json!("{{}}"), &ctx).unwrap_err();
    assert_eq!(empty.kind, InterpolationErrorKind::SyntaxError);

    let unterminated = interp.interpolate(&json!("oops {{x"), &ctx).unwrap_err();
    assert_eq!(unterminated.kind, InterpolationErrorKind::SyntaxError);
}

#[test]
fn recurses_into_arrays_and_objects() {
    let ctx = ctx_with(&[("x", json!("inner"))]);
    let template = json!({
        "list": ["{{x}}", "literal", 3],
        "nested": {"ref": "{{x}}"}
    });
    let res = Interpolator::new().interpolate(&template, &ctx).unwrap();
    assert_eq!(
        res.value,
        json!({
            "list": ["inner", "literal", 3],
            "nested": {"ref": "inner"}
        })
    );
}

#[test]
fn dependencies_are_tracked_even_when_unresolved() {
    let ctx = ctx_with(&[("a", json!(1))]);
    let res = Interpolator::new()
        .interpolate(&json!("{{a}} and {{b.output}}"), &ctx)
        .unwrap();
    assert!(res.dependencies.contains("a"));
    assert!(res.dependencies.contains("b"));
}

#[test]
fn coerce_string_to_array() {
    assert_eq!(
        coerce(&json!("a,b,c"), SchemaKind::Array),
        Some(json!(["a", "b", "c"]))
    );
    // JSON parse wins over CSV when the string is bracketed.
    assert_eq!(coerce(&json!("[1,2]"), SchemaKind::Array), Some(json!([1, 2])));
}

#[test]
fn coerce_scalars() {
    assert_eq!(coerce(&json!("42"), SchemaKind::Number), Some(json!(42.0)));
    assert_eq!(coerce(&json!("3.5"), SchemaKind::Number), Some(json!(3.5)));
    assert_eq!(coerce(&json!("YES"), SchemaKind::Boolean), Some(json!(true)));
    assert_eq!(coerce(&json!("0"), SchemaKind::Boolean), Some(json!(false)));
    assert_eq!(
        coerce(&json!("{\"k\": 1}"), SchemaKind::Object),
        Some(json!({"k": 1}))
    );
    assert_eq!(coerce(&json!("maybe"), SchemaKind::Boolean), None);
}

#[test]
fn process_coerces_only_on_mismatch() {
    let ctx = ctx_with(&[]);
    let interp = Interpolator::new();
    let schema = FieldSchema::new(SchemaKind::Number);

    let ok = interp.process(&json!("42"), &schema, "n", &ctx).unwrap();
    assert_eq!(ok.value, json!(42.0));

    let already = interp.process(&json!(7), &schema, "n", &ctx).unwrap();
    assert_eq!(already.value, json!(7));

    // Coercion failure surfaces the original validation error.
    let err = interp.process(&json!("abc"), &schema, "n", &ctx).unwrap_err();
    assert_eq!(err.kind, InterpolationErrorKind::TypeMismatch);
}

#[test]
fn prepare_inputs_enforces_required_handles() {
    let ctx = ctx_with(&[]);
    let contract = NodeContract::new("t", "T", NodeCategory::Tool)
        .input("prompt", FieldSchema::required(SchemaKind::String));

    let err = Interpolator::new()
        .prepare_inputs(&HashMap::new(), &contract, &ctx)
        .unwrap_err();
    assert_eq!(err.kind, InterpolationErrorKind::ValidationError);
    assert_eq!(err.path, "prompt");
}

#[test]
fn prepare_inputs_passes_extras_through() {
    let ctx = ctx_with(&[("src", json!("hi"))]);
    let contract = NodeContract::new("t", "T", NodeCategory::Tool);
    let mut raw = HashMap::new();
    raw.insert("extra".to_string(), json!("{{src}}"));

    let (resolved, deps) = Interpolator::new()
        .prepare_inputs(&raw, &contract, &ctx)
        .unwrap();
    assert_eq!(resolved.get("extra"), Some(&json!("hi")));
    assert!(deps.contains("src"));
}
