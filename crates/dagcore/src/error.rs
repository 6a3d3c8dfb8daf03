use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::NodeId;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Invalid state transition for node '{node_id}': {from} -> {to}")]
    InvalidTransition {
        node_id: NodeId,
        from: String,
        to: String,
    },

    #[error("No execution has been recorded yet")]
    NotExecuted,

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Execution timed out after {millis}ms")]
    Timeout { millis: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures raised by a single node while it runs.
///
/// These never abort a run; the executor stores them in the node's record.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail")]
pub enum NodeError {
    #[error("Template resolution failed: no value for placeholder '{0}'")]
    TemplateResolution(String),

    #[error("Extraction failed for '{key}': {reason}")]
    Extraction { key: String, reason: String },

    #[error("Request failed after {attempts} attempt(s): {last_error}")]
    RequestFailed { attempts: u32, last_error: String },

    #[error("Transform failed: {0}")]
    Transform(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Cancelled")]
    Cancelled,
}

/// Graph construction errors. Fatal: execution never starts.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("Duplicate node id: {0}")]
    DuplicateNode(NodeId),

    #[error("Node not found: {0}")]
    UnknownNode(NodeId),

    #[error("Edge {from} -> {to} would create a cycle")]
    Cycle { from: NodeId, to: NodeId },

    #[error("Invalid node id '{0}': ids must be non-empty and must not contain '.'")]
    InvalidNodeId(String),

    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("Invalid workflow: {0}")]
    Invalid(String),
}
