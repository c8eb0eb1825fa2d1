use loomcore::{
    value_type_name, ExecutionContext, FieldSchema, InterpolationError, InterpolationErrorKind,
    NodeContract, NodeStatus, SchemaKind,
};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([^{}]*?)\s*\}\}").expect("placeholder regex"))
}

/// Result of resolving a template value: the resolved value plus the node
/// ids it referenced. Dependencies are tracked independently of declared
/// edges, since ad hoc references are legal.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub value: Value,
    pub dependencies: HashSet<String>,
}

/// Resolves `{{...}}` references against run state, coerces loosely-typed
/// data toward a node's input schema, and validates the result.
///
/// Reference forms: `{{Node.output.a.b}}` (chained access into a completed
/// node's output), `{{$env.KEY}}`, `{{$global.KEY}}`. A string that is
/// exactly one placeholder keeps the referenced value's type; placeholders
/// embedded in a larger string are stringified in place, and an unresolved
/// embedded placeholder becomes the empty string.
#[derive(Debug, Default, Clone, Copy)]
pub struct Interpolator;

impl Interpolator {
    pub fn new() -> Self {
        Self
    }

    /// Recursively resolve every template reference inside `value`.
    pub fn interpolate(
        &self,
        value: &Value,
        ctx: &ExecutionContext,
    ) -> Result<Resolution, InterpolationError> {
        let mut dependencies = HashSet::new();
        let value = self.walk(value, ctx, &mut dependencies)?;
        Ok(Resolution {
            value,
            dependencies,
        })
    }

    fn walk(
        &self,
        value: &Value,
        ctx: &ExecutionContext,
        deps: &mut HashSet<String>,
    ) -> Result<Value, InterpolationError> {
        match value {
            Value::String(s) => self.interpolate_string(s, ctx, deps),
            Value::Array(items) => {
                let resolved = items
                    .iter()
                    .map(|item| self.walk(item, ctx, deps))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Array(resolved))
            }
            Value::Object(map) => {
                let mut resolved = Map::with_capacity(map.len());
                for (key, item) in map {
                    resolved.insert(key.clone(), self.walk(item, ctx, deps)?);
                }
                Ok(Value::Object(resolved))
            }
            other => Ok(other.clone()),
        }
    }

    fn interpolate_string(
        &self,
        input: &str,
        ctx: &ExecutionContext,
        deps: &mut HashSet<String>,
    ) -> Result<Value, InterpolationError> {
        let re = placeholder_re();

        let Some(first) = re.find(input) else {
            if input.contains("{{") {
                return Err(InterpolationError::new(
                    InterpolationErrorKind::SyntaxError,
                    input,
                    "unterminated placeholder",
                ));
            }
            return Ok(Value::String(input.to_string()));
        };

        // Exact-match rule: a lone placeholder keeps the resolved type.
        if first.start() == 0 && first.end() == input.len() {
            let expr = re
                .captures(input)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str())
                .unwrap_or("");
            return self.resolve_reference(expr, ctx, deps);
        }

        let mut out = String::new();
        let mut last = 0;
        for caps in re.captures_iter(input) {
            let whole = caps.get(0).expect("match group 0");
            out.push_str(&input[last..whole.start()]);
            let expr = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            match self.resolve_reference(expr, ctx, deps) {
                Ok(value) => out.push_str(&stringify(&value)),
                Err(err) if err.kind == InterpolationErrorKind::SyntaxError => return Err(err),
                // Unresolved embedded placeholders substitute as empty.
                Err(_) => {}
            }
            last = whole.end();
        }
        out.push_str(&input[last..]);

        if out.contains("{{") {
            return Err(InterpolationError::new(
                InterpolationErrorKind::SyntaxError,
                input,
                "unterminated placeholder",
            ));
        }

        Ok(Value::String(out))
    }

    /// Resolve a single reference expression (the text between the braces).
    fn resolve_reference(
        &self,
        expr: &str,
        ctx: &ExecutionContext,
        deps: &mut HashSet<String>,
    ) -> Result<Value, InterpolationError> {
        if expr.is_empty() {
            return Err(InterpolationError::new(
                InterpolationErrorKind::SyntaxError,
                expr,
                "empty placeholder",
            ));
        }

        let segments: Vec<&str> = expr.split('.').collect();
        let head = segments[0];

        if head == "$env" || head == "$global" {
            if segments.len() < 2 {
                return Err(InterpolationError::new(
                    InterpolationErrorKind::SyntaxError,
                    expr,
                    format!("{} requires a key", head),
                ));
            }
            let source = if head == "$env" {
                &ctx.environment
            } else {
                &ctx.memory
            };
            let root = source.get(segments[1]).ok_or_else(|| {
                InterpolationError::new(
                    InterpolationErrorKind::MissingDependency,
                    expr,
                    format!("'{}' is not set", segments[1]),
                )
            })?;
            return lookup_path(root, &segments[2..], expr);
        }

        // Node reference. The dependency is recorded whether or not the
        // node is resolvable yet.
        deps.insert(head.to_string());

        let state = ctx.node_states.get(head).ok_or_else(|| {
            InterpolationError::new(
                InterpolationErrorKind::MissingDependency,
                expr,
                format!("node '{}' does not exist", head),
            )
        })?;
        if state.status != NodeStatus::Completed {
            return Err(InterpolationError::new(
                InterpolationErrorKind::MissingDependency,
                expr,
                format!("node '{}' has not completed", head),
            ));
        }

        let output = state.output.clone().unwrap_or(Value::Null);
        let rest = &segments[1..];
        if rest.is_empty() {
            return Ok(output);
        }

        match rest[0] {
            "output" => lookup_path(&output, &rest[1..], expr),
            "status" => Ok(serde_json::to_value(state.status).unwrap_or(Value::Null)),
            "error" => Ok(state
                .error
                .as_ref()
                .map(|e| Value::String(e.message.clone()))
                .unwrap_or(Value::Null)),
            // Anything else falls through into the output's own fields, so
            // `{{N.text}}` reads the same as `{{N.output.text}}`.
            _ => lookup_path(&output, rest, expr),
        }
    }

    /// Check `value` against a field schema. Kind mismatches are
    /// `type_mismatch`; they may still be recoverable by coercion.
    pub fn validate(
        &self,
        path: &str,
        value: &Value,
        schema: &FieldSchema,
    ) -> Result<(), InterpolationError> {
        if schema.kind.matches(value) {
            return Ok(());
        }
        Err(InterpolationError::new(
            InterpolationErrorKind::TypeMismatch,
            path,
            format!(
                "expected {}, got {}",
                schema.kind.name(),
                value_type_name(value)
            ),
        ))
    }

    /// Full pipeline for one value: interpolate, then validate, coercing
    /// only when direct validation fails. If coercion cannot produce a
    /// schema-valid value the original validation error is surfaced.
    pub fn process(
        &self,
        value: &Value,
        schema: &FieldSchema,
        path: &str,
        ctx: &ExecutionContext,
    ) -> Result<Resolution, InterpolationError> {
        let mut resolution = self.interpolate(value, ctx)?;

        match self.validate(path, &resolution.value, schema) {
            Ok(()) => Ok(resolution),
            Err(original) => match coerce(&resolution.value, schema.kind) {
                Some(coerced) if schema.kind.matches(&coerced) => {
                    resolution.value = coerced;
                    Ok(resolution)
                }
                _ => Err(original),
            },
        }
    }

    /// Resolve a node's raw input map against its contract: every schema
    /// field goes through the full pipeline, required handles must be
    /// present, and unschema'd extras are interpolated and passed through.
    pub fn prepare_inputs(
        &self,
        raw: &HashMap<String, Value>,
        contract: &NodeContract,
        ctx: &ExecutionContext,
    ) -> Result<(HashMap<String, Value>, HashSet<String>), InterpolationError> {
        let mut resolved = HashMap::with_capacity(raw.len());
        let mut dependencies = HashSet::new();

        for (name, schema) in &contract.inputs {
            match raw.get(name) {
                Some(value) => {
                    let outcome = self.process(value, schema, name, ctx)?;
                    dependencies.extend(outcome.dependencies);
                    resolved.insert(name.clone(), outcome.value);
                }
                None if schema.required => {
                    return Err(InterpolationError::new(
                        InterpolationErrorKind::ValidationError,
                        name,
                        "required input is missing",
                    ));
                }
                None => {}
            }
        }

        for (name, value) in raw {
            if contract.inputs.contains_key(name) {
                continue;
            }
            let outcome = self.interpolate(value, ctx)?;
            dependencies.extend(outcome.dependencies);
            resolved.insert(name.clone(), outcome.value);
        }

        Ok((resolved, dependencies))
    }
}

/// Chained field access, with numeric segments indexing into arrays.
fn lookup_path(root: &Value, path: &[&str], expr: &str) -> Result<Value, InterpolationError> {
    let mut current = root;
    for segment in path {
        let next = match current {
            Value::Object(map) => map.get(*segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        current = next.ok_or_else(|| {
            InterpolationError::new(
                InterpolationErrorKind::MissingDependency,
                expr,
                format!("field '{}' does not exist", segment),
            )
        })?;
    }
    Ok(current.clone())
}

/// How resolved values appear when substituted into a larger string.
fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// Best-effort coercion from a string toward the schema kind. Only strings
/// are coerced; anything else either already validated or stays mismatched.
pub fn coerce(value: &Value, kind: SchemaKind) -> Option<Value> {
    let text = value.as_str()?;
    let trimmed = text.trim();

    match kind {
        SchemaKind::Array => {
            // JSON parse preferred when the string looks bracketed, CSV
            // split otherwise.
            if trimmed.starts_with('[') {
                if let Ok(parsed) = serde_json::from_str::<Value>(trimmed) {
                    if parsed.is_array() {
                        return Some(parsed);
                    }
                }
            }
            let items = trimmed
                .split(',')
                .map(|part| Value::String(part.trim().to_string()))
                .collect();
            Some(Value::Array(items))
        }
        SchemaKind::Object => serde_json::from_str::<Value>(trimmed)
            .ok()
            .filter(Value::is_object),
        SchemaKind::Number => trimmed
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),
        SchemaKind::Boolean => match trimmed.to_lowercase().as_str() {
            "true" | "1" | "yes" => Some(Value::Bool(true)),
            "false" | "0" | "no" => Some(Value::Bool(false)),
            _ => None,
        },
        SchemaKind::String | SchemaKind::Any => None,
    }
}
