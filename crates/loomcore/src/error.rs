use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Where a template resolution or validation went wrong. Structured so
/// callers can branch on kind instead of parsing messages.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{kind} at '{path}': {message}")]
pub struct InterpolationError {
    pub kind: InterpolationErrorKind,
    /// Template path or reference that failed, e.g. `Fetch.output.body`.
    pub path: String,
    pub message: String,
}

impl InterpolationError {
    pub fn new(
        kind: InterpolationErrorKind,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            path: path.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterpolationErrorKind {
    /// Referenced node is absent, not yet completed, or the path into its
    /// output does not exist.
    MissingDependency,
    TypeMismatch,
    ValidationError,
    SyntaxError,
}

impl std::fmt::Display for InterpolationErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::MissingDependency => "missing_dependency",
            Self::TypeMismatch => "type_mismatch",
            Self::ValidationError => "validation_error",
            Self::SyntaxError => "syntax_error",
        };
        f.write_str(s)
    }
}

/// Errors raised by a node processor during execution.
#[derive(Error, Debug, Clone)]
pub enum NodeError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input '{field}': expected {expected}, got {actual}")]
    InvalidInput {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error(transparent)]
    Interpolation(#[from] InterpolationError),

    #[error("Cancelled")]
    Cancelled,
}

/// Structural problems with a graph definition, caught at load time.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Duplicate node id: {0}")]
    DuplicateNodeId(String),

    #[error("Duplicate edge id: {0}")]
    DuplicateEdgeId(String),

    #[error("Edge '{edge}' refers to unknown node '{node}'")]
    UnknownEndpoint { edge: String, node: String },

    #[error("Cyclic dependency detected")]
    CyclicDependency,
}

/// Run-level errors from the scheduler's public surface.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Run is {0} and cannot accept this transition")]
    InvalidState(&'static str),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Per-node failure classification recorded in the execution state.
/// Mirrors the interpolation kinds plus the execution-side outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    MissingDependency,
    TypeMismatch,
    ValidationError,
    SyntaxError,
    ExecutionError,
    UnregisteredType,
    Cancelled,
}

impl From<InterpolationErrorKind> for FailureKind {
    fn from(kind: InterpolationErrorKind) -> Self {
        match kind {
            InterpolationErrorKind::MissingDependency => Self::MissingDependency,
            InterpolationErrorKind::TypeMismatch => Self::TypeMismatch,
            InterpolationErrorKind::ValidationError => Self::ValidationError,
            InterpolationErrorKind::SyntaxError => Self::SyntaxError,
        }
    }
}

impl From<&NodeError> for FailureKind {
    fn from(err: &NodeError) -> Self {
        match err {
            NodeError::Interpolation(e) => e.kind.into(),
            NodeError::Cancelled => Self::Cancelled,
            _ => Self::ExecutionError,
        }
    }
}
