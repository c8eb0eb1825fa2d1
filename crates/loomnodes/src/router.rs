use async_trait::async_trait;
use loomcore::{
    FieldSchema, NodeCategory, NodeContract, NodeError, Processor, ProcessorContext, SchemaKind,
};
use loomruntime::NodeDefinition;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;

pub const ROUTER_TYPE: &str = "logic.router";

/// The fixed set of safe comparisons a router may evaluate. Deliberately
/// not a general expression language: user graphs never execute code here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Equals,
    GreaterThan,
    LessThan,
    Contains,
    Exists,
}

impl FromStr for Comparator {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "equals" => Ok(Self::Equals),
            "greater_than" => Ok(Self::GreaterThan),
            "less_than" => Ok(Self::LessThan),
            "contains" => Ok(Self::Contains),
            "exists" => Ok(Self::Exists),
            other => Err(NodeError::Configuration(format!(
                "unknown condition '{}'",
                other
            ))),
        }
    }
}

impl Comparator {
    pub fn evaluate(self, value: &Value, compare: Option<&Value>) -> bool {
        match self {
            Self::Equals => compare.map(|c| loose_eq(value, c)).unwrap_or(false),
            Self::GreaterThan => match (as_number(value), compare.and_then(as_number)) {
                (Some(a), Some(b)) => a > b,
                _ => false,
            },
            Self::LessThan => match (as_number(value), compare.and_then(as_number)) {
                (Some(a), Some(b)) => a < b,
                _ => false,
            },
            Self::Contains => match (value, compare) {
                (Value::String(s), Some(c)) => match c {
                    Value::String(needle) => s.contains(needle.as_str()),
                    other => s.contains(&stringify(other)),
                },
                (Value::Array(items), Some(c)) => items.iter().any(|item| loose_eq(item, c)),
                _ => false,
            },
            Self::Exists => !value.is_null(),
        }
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Equality that tolerates number/string representation differences coming
/// off the canvas ("5" vs 5).
fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

/// Conditional branching node. The output carries both the boolean result
/// and a discrete `route` tag; downstream edges select on the tag through
/// their source handle, so the scheduler needs no special code path.
pub struct RouterProcessor;

#[async_trait]
impl Processor for RouterProcessor {
    async fn execute(&self, ctx: ProcessorContext) -> Result<Option<Value>, NodeError> {
        let condition: Comparator = ctx.require_str("condition")?.parse()?;
        let value = ctx.require_input("value")?;
        let compare = ctx.inputs.get("compareValue");

        let result = condition.evaluate(value, compare);
        Ok(Some(json!({
            "result": result,
            "route": if result { "true" } else { "false" },
            "value": value.clone(),
        })))
    }
}

pub fn router_definition() -> NodeDefinition {
    let contract = NodeContract::new(ROUTER_TYPE, "Router", NodeCategory::Logic)
        .input(
            "value",
            FieldSchema::required(SchemaKind::Any).describe("Value under test"),
        )
        .input(
            "condition",
            FieldSchema::required(SchemaKind::String)
                .describe("equals | greater_than | less_than | contains | exists"),
        )
        .input("compareValue", FieldSchema::new(SchemaKind::Any))
        .output("result", FieldSchema::new(SchemaKind::Boolean))
        .output("route", FieldSchema::new(SchemaKind::String))
        .output("value", FieldSchema::new(SchemaKind::Any));

    NodeDefinition::new(contract, Arc::new(RouterProcessor))
}
