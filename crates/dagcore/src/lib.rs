//! Core abstractions for the DAG engine
//!
//! This crate provides the fundamental types and traits that all other
//! components depend on: values, the node capability, input binding,
//! the graph itself, and execution events.

mod definition;
mod error;
pub mod events;
mod graph;
mod inputs;
mod node;
mod value;

pub use definition::{EdgeDefinition, GraphDefinition, NodeDefinition};
pub use error::{FlowError, NodeError, WorkflowError};
pub use events::{EventBus, EventEmitter, ExecutionEvent, ExecutionId, NodeEvent};
pub use graph::Graph;
pub use inputs::{NodeInputs, QualifiedKey};
pub use node::{
    AttemptLog, AttemptRecord, Node, NodeContext, NodeOutput, NodeStatus, OutputResolution,
};
pub use value::Value;

/// Caller-assigned node identity
pub type NodeId = String;

/// Output mapping produced by a node
pub type Outputs = std::collections::BTreeMap<String, Value>;

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
