//! Graph execution runtime
//!
//! This crate turns a declarative graph definition into a running,
//! observable computation: a node-type registry, the template interpolator,
//! the tick-based scheduler, and the history/provenance recorder.

mod history;
mod interpolator;
mod registry;
mod scheduler;

pub use history::{HistoryRecorder, ProvenanceRecord, HISTORY_LIMIT};
pub use interpolator::{coerce, Interpolator, Resolution};
pub use registry::{
    NodeDefinition, NodeRegistry, ProcessorSource, RegistryEvent, RegistrySubscription,
};
pub use scheduler::{Scheduler, SchedulerConfig};
