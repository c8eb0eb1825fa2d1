use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Palette grouping for node types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeCategory {
    Agent,
    Tool,
    Logic,
    Human,
    Custom,
}

/// Shape a value must satisfy after interpolation and coercion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaKind {
    String,
    Number,
    Boolean,
    Array,
    Object,
    Any,
}

impl SchemaKind {
    /// Does `value` already satisfy this kind?
    pub fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Any => true,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
            Self::Any => "any",
        }
    }
}

/// Human-readable name for a JSON value's type, for error messages.
pub fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Schema for one input or output handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSchema {
    pub kind: SchemaKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FieldSchema {
    pub fn new(kind: SchemaKind) -> Self {
        Self {
            kind,
            required: false,
            description: None,
        }
    }

    pub fn required(kind: SchemaKind) -> Self {
        Self {
            kind,
            required: true,
            description: None,
        }
    }

    pub fn describe(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }
}

/// Presentation hints for the editor. Non-functional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UiMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Declarative description of a node type: typed inputs/outputs, defaults,
/// and the external capabilities it needs. Immutable once registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeContract {
    pub type_id: String,
    pub display_name: String,
    pub category: NodeCategory,
    #[serde(default)]
    pub inputs: BTreeMap<String, FieldSchema>,
    #[serde(default)]
    pub outputs: BTreeMap<String, FieldSchema>,
    /// Config values applied when the instance does not set them.
    #[serde(default)]
    pub defaults: Map<String, Value>,
    /// Named capabilities the processor requires, e.g. a secret or service.
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    #[serde(default)]
    pub ui: UiMetadata,
}

impl NodeContract {
    pub fn new(
        type_id: impl Into<String>,
        display_name: impl Into<String>,
        category: NodeCategory,
    ) -> Self {
        Self {
            type_id: type_id.into(),
            display_name: display_name.into(),
            category,
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            defaults: Map::new(),
            required_capabilities: Vec::new(),
            ui: UiMetadata::default(),
        }
    }

    pub fn input(mut self, name: impl Into<String>, schema: FieldSchema) -> Self {
        self.inputs.insert(name.into(), schema);
        self
    }

    pub fn output(mut self, name: impl Into<String>, schema: FieldSchema) -> Self {
        self.outputs.insert(name.into(), schema);
        self
    }

    pub fn default_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.defaults.insert(key.into(), value.into());
        self
    }

    pub fn capability(mut self, name: impl Into<String>) -> Self {
        self.required_capabilities.push(name.into());
        self
    }

    pub fn ui(mut self, ui: UiMetadata) -> Self {
        self.ui = ui;
        self
    }
}
