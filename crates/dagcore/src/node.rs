use crate::{events::EventEmitter, NodeError, NodeId, NodeInputs, Outputs};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Core trait that all executable nodes implement
#[async_trait]
pub trait Node: Send + Sync {
    /// Caller-assigned identity, unique within a graph
    fn id(&self) -> &str;

    /// Type identifier (e.g., "source", "http.call")
    fn node_type(&self) -> &str;

    /// Produce this node's outputs from the resolved inputs in `ctx`.
    ///
    /// Must not mutate shared state other than through the returned value.
    async fn process(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError>;
}

impl fmt::Debug for dyn Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id())
            .field("node_type", &self.node_type())
            .finish()
    }
}

/// Execution context passed to each node
#[derive(Clone)]
pub struct NodeContext {
    pub node_id: NodeId,

    /// Inputs resolved from direct predecessors; read-only to the node
    pub inputs: NodeInputs,

    /// Per-attempt log, read back by the executor for provenance
    pub attempts: AttemptLog,

    /// Event emitter for real-time updates
    pub events: EventEmitter,

    /// Cancelled when the run is cancelled or times out
    pub cancellation: CancellationToken,
}

impl NodeContext {
    pub fn new(node_id: impl Into<NodeId>, inputs: NodeInputs, events: EventEmitter) -> Self {
        Self {
            node_id: node_id.into(),
            inputs,
            attempts: AttemptLog::default(),
            events,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }
}

/// Lifecycle of a node within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, NodeStatus::Succeeded | NodeStatus::Failed)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Running => "running",
            NodeStatus::Succeeded => "succeeded",
            NodeStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How a successful node arrived at its outputs
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum OutputResolution {
    /// Produced by the node's normal path
    #[default]
    Completed,
    /// Substituted by a status-specific error handler
    ErrorHandler { status: u16 },
    /// Retries exhausted; configured defaults were returned
    DefaultOutputs { last_error: String },
}

/// Output from node execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeOutput {
    pub outputs: Outputs,
    pub resolution: OutputResolution,
}

impl NodeOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_outputs(outputs: Outputs) -> Self {
        Self {
            outputs,
            resolution: OutputResolution::Completed,
        }
    }

    pub fn with_output(mut self, key: impl Into<String>, value: impl Into<crate::Value>) -> Self {
        self.outputs.insert(key.into(), value.into());
        self
    }

    pub fn with_resolution(mut self, resolution: OutputResolution) -> Self {
        self.resolution = resolution;
        self
    }
}

/// One attempt of a node's work (an HTTP request, for instance)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub status: Option<u16>,
    pub error: Option<String>,
}

/// Shared, append-only list of attempts for one node execution
#[derive(Debug, Clone, Default)]
pub struct AttemptLog {
    entries: Arc<Mutex<Vec<AttemptRecord>>>,
}

impl AttemptLog {
    pub async fn record(&self, attempt: AttemptRecord) {
        self.entries.lock().await.push(attempt);
    }

    pub async fn snapshot(&self) -> Vec<AttemptRecord> {
        self.entries.lock().await.clone()
    }
}
