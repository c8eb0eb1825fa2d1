//! Core abstractions for the loom graph execution engine
//!
//! This crate provides the fundamental types and traits that all other
//! components depend on: graph definitions, execution state, node contracts,
//! the processor trait, and the error taxonomy.

mod contract;
mod error;
mod events;
mod graph;
mod node;
mod service;
mod state;

pub use contract::{
    value_type_name, FieldSchema, NodeCategory, NodeContract, SchemaKind, UiMetadata,
};
pub use error::{
    EngineError, FailureKind, GraphError, InterpolationError, InterpolationErrorKind, NodeError,
};
pub use events::{EngineEvent, EventBus};
pub use graph::{EdgeDefinition, GraphDefinition, NodeInstance, Position, RunId};
pub use node::{Processor, ProcessorContext};
pub use service::{ChatMessage, ChatOptions, ChatRole, ModelService};
pub use state::{
    ExecutionContext, NodeFailure, NodeRunState, NodeStatus, RunStatus, Snapshot,
};

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
