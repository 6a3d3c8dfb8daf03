use chrono::{DateTime, Utc};
use dagcore::{
    AttemptRecord, FlowError, NodeError, NodeId, NodeInputs, NodeOutput, NodeStatus,
    OutputResolution, Outputs,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Everything known about one node's execution within a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub node_id: NodeId,
    pub node_type: String,
    pub status: NodeStatus,
    /// Inputs as resolved at dispatch time
    pub inputs: NodeInputs,
    /// Present iff the node succeeded
    pub outputs: Option<Outputs>,
    pub resolution: Option<OutputResolution>,
    /// Present iff the node failed
    pub error: Option<NodeError>,
    pub attempt_count: u32,
    pub attempts: Vec<AttemptRecord>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

impl ExecutionRecord {
    fn pending(node_id: NodeId, node_type: String) -> Self {
        Self {
            node_id,
            node_type,
            status: NodeStatus::Pending,
            inputs: NodeInputs::new(),
            outputs: None,
            resolution: None,
            error: None,
            attempt_count: 0,
            attempts: Vec::new(),
            started_at: None,
            finished_at: None,
            duration_ms: None,
        }
    }

    pub fn is_succeeded(&self) -> bool {
        self.status == NodeStatus::Succeeded
    }

    pub fn is_failed(&self) -> bool {
        self.status == NodeStatus::Failed
    }

    /// Single output value, if the node succeeded and produced it
    pub fn output(&self, key: &str) -> Option<&dagcore::Value> {
        self.outputs.as_ref().and_then(|o| o.get(key))
    }
}

/// Append-only record of a single run.
///
/// Each node's record moves `Pending -> Running -> Succeeded | Failed`
/// exactly once; any other transition is refused.
#[derive(Debug, Clone, Default)]
pub struct ProvenanceStore {
    records: IndexMap<NodeId, ExecutionRecord>,
}

impl ProvenanceStore {
    /// Fresh store with every node `Pending`
    pub fn new<'a, I>(nodes: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let records = nodes
            .into_iter()
            .map(|(id, node_type)| {
                (
                    id.to_string(),
                    ExecutionRecord::pending(id.to_string(), node_type.to_string()),
                )
            })
            .collect();
        Self { records }
    }

    pub fn get(&self, node_id: &str) -> Option<&ExecutionRecord> {
        self.records.get(node_id)
    }

    /// Outputs of a node that succeeded
    pub fn outputs(&self, node_id: &str) -> Option<&Outputs> {
        self.records.get(node_id).and_then(|r| r.outputs.as_ref())
    }

    pub fn records(&self) -> impl Iterator<Item = &ExecutionRecord> {
        self.records.values()
    }

    pub fn into_records(self) -> IndexMap<NodeId, ExecutionRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn mark_running(&mut self, node_id: &str, inputs: NodeInputs) -> Result<(), FlowError> {
        let record = self.transition(node_id, NodeStatus::Pending, NodeStatus::Running)?;
        record.inputs = inputs;
        record.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn record_success(
        &mut self,
        node_id: &str,
        output: NodeOutput,
        attempts: Vec<AttemptRecord>,
    ) -> Result<(), FlowError> {
        let record = self.transition(node_id, NodeStatus::Running, NodeStatus::Succeeded)?;
        record.outputs = Some(output.outputs);
        record.resolution = Some(output.resolution);
        finish(record, attempts);
        Ok(())
    }

    pub fn record_failure(
        &mut self,
        node_id: &str,
        error: NodeError,
        attempts: Vec<AttemptRecord>,
    ) -> Result<(), FlowError> {
        let record = self.transition(node_id, NodeStatus::Running, NodeStatus::Failed)?;
        record.error = Some(error);
        finish(record, attempts);
        Ok(())
    }

    /// Fail every node still `Running`; used when a run is cut short.
    /// `attempts` holds whatever each interrupted node had logged so far.
    /// Returns the ids affected.
    pub fn abandon_in_flight(
        &mut self,
        error: NodeError,
        mut attempts: HashMap<NodeId, Vec<AttemptRecord>>,
    ) -> Vec<NodeId> {
        let mut abandoned = Vec::new();
        for record in self.records.values_mut() {
            if record.status == NodeStatus::Running {
                record.status = NodeStatus::Failed;
                record.error = Some(error.clone());
                let logged = attempts.remove(&record.node_id).unwrap_or_default();
                finish(record, logged);
                abandoned.push(record.node_id.clone());
            }
        }
        abandoned
    }

    fn transition(
        &mut self,
        node_id: &str,
        from: NodeStatus,
        to: NodeStatus,
    ) -> Result<&mut ExecutionRecord, FlowError> {
        let record = self
            .records
            .get_mut(node_id)
            .ok_or_else(|| dagcore::WorkflowError::UnknownNode(node_id.to_string()))?;

        if record.status != from {
            return Err(FlowError::InvalidTransition {
                node_id: node_id.to_string(),
                from: record.status.to_string(),
                to: to.to_string(),
            });
        }
        record.status = to;
        Ok(record)
    }
}

fn finish(record: &mut ExecutionRecord, attempts: Vec<AttemptRecord>) {
    let finished = Utc::now();
    record.attempt_count = (attempts.len() as u32).max(1);
    record.attempts = attempts;
    record.duration_ms = record
        .started_at
        .map(|started| (finished - started).num_milliseconds().max(0) as u64);
    record.finished_at = Some(finished);
}
