use crate::{ExecutionRecord, InputAggregator, ProvenanceStore, RuntimeConfig};
use chrono::Utc;
use dagcore::{
    AttemptLog, AttemptRecord, EventBus, ExecutionEvent, ExecutionId, FlowError, Graph, Node,
    NodeContext, NodeError, NodeId, NodeOutput, NodeStatus, OutputResolution, Outputs, Value,
    WorkflowError,
};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use indexmap::IndexMap;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, RwLock};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Executes a graph layer by layer, running each layer's nodes concurrently
pub struct DagExecutor {
    graph: Graph,
    config: RuntimeConfig,
    event_bus: Arc<EventBus>,
    cancellation: CancellationToken,
    last_run: RwLock<Option<ProvenanceStore>>,
}

impl DagExecutor {
    pub fn new(graph: Graph) -> Self {
        Self::with_config(graph, RuntimeConfig::default())
    }

    pub fn with_config(graph: Graph, config: RuntimeConfig) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        Self {
            graph,
            config,
            event_bus,
            cancellation: CancellationToken::new(),
            last_run: RwLock::new(None),
        }
    }

    /// Publish events on a shared bus instead of a private one
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    /// Cancelling this token aborts the current and any later run
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Run every node once and return one record per node.
    ///
    /// Node failures are recorded, not returned. `Err` means the run never
    /// started (invalid graph) or was cut short by cancellation or the
    /// configured time limit; the partial provenance is still kept.
    pub async fn execute(&self) -> Result<ExecutionResult, FlowError> {
        let execution_id = ExecutionId::new_v4();
        let start_time = Instant::now();

        let layers = self.graph.topological_layers()?;
        let mut store = ProvenanceStore::new(
            self.graph
                .node_ids()
                .filter_map(|id| self.graph.node(id).map(|node| (id, node.node_type()))),
        );

        tracing::info!(
            execution_id = %execution_id,
            graph = self.graph.name(),
            nodes = self.graph.len(),
            layers = layers.len(),
            "Starting graph execution"
        );
        self.event_bus.emit(ExecutionEvent::RunStarted {
            execution_id,
            graph: self.graph.name().to_string(),
            node_count: self.graph.len(),
            timestamp: Utc::now(),
        });

        let run_token = self.cancellation.child_token();
        let mut attempt_logs = HashMap::new();
        let outcome = {
            let run = self.run_layers(
                execution_id,
                &layers,
                &mut store,
                &mut attempt_logs,
                &run_token,
            );
            match self.config.max_execution_time {
                Some(limit) => match timeout(limit, run).await {
                    Ok(result) => result,
                    Err(_) => Err(FlowError::Timeout {
                        millis: limit.as_millis() as u64,
                    }),
                },
                None => run.await,
            }
        };

        if let Err(e) = &outcome {
            run_token.cancel();
            let mut logged = HashMap::new();
            for (node_id, log) in attempt_logs {
                if store.get(&node_id).is_some_and(|r| r.status == NodeStatus::Running) {
                    logged.insert(node_id, log.snapshot().await);
                }
            }
            for node_id in store.abandon_in_flight(NodeError::Cancelled, logged) {
                tracing::warn!("Node {} abandoned: {}", node_id, e);
                self.event_bus.emit(ExecutionEvent::NodeFailed {
                    execution_id,
                    node_id,
                    error: NodeError::Cancelled.to_string(),
                    timestamp: Utc::now(),
                });
            }
        }

        let duration_ms = start_time.elapsed().as_millis() as u64;
        let succeeded = store.records().filter(|r| r.is_succeeded()).count();
        let failed = store.records().filter(|r| r.is_failed()).count();
        tracing::info!(
            execution_id = %execution_id,
            succeeded,
            failed,
            duration_ms,
            "Graph execution finished"
        );
        self.event_bus.emit(ExecutionEvent::RunCompleted {
            execution_id,
            succeeded,
            failed,
            duration_ms,
            timestamp: Utc::now(),
        });

        let records = store.clone().into_records();
        *self.last_run.write().await = Some(store);
        outcome?;

        Ok(ExecutionResult {
            execution_id,
            records,
            duration_ms,
        })
    }

    /// Records for `node_id` and all of its ancestors from the latest run,
    /// ancestors first.
    pub async fn get_provenance(
        &self,
        node_id: &str,
    ) -> Result<IndexMap<NodeId, ExecutionRecord>, FlowError> {
        let guard = self.last_run.read().await;
        let store = guard.as_ref().ok_or(FlowError::NotExecuted)?;
        provenance_chain(&self.graph, node_id, |id| store.get(id))
    }

    async fn run_layers(
        &self,
        execution_id: ExecutionId,
        layers: &[Vec<NodeId>],
        store: &mut ProvenanceStore,
        attempt_logs: &mut HashMap<NodeId, AttemptLog>,
        token: &CancellationToken,
    ) -> Result<(), FlowError> {
        for (depth, layer) in layers.iter().enumerate() {
            tracing::debug!(layer = depth, nodes = layer.len(), "Dispatching layer");

            let mut running = FuturesUnordered::new();
            for node_id in layer {
                let node = self
                    .graph
                    .node(node_id)
                    .ok_or_else(|| WorkflowError::UnknownNode(node_id.clone()))?;

                let inputs = InputAggregator::resolve(&self.graph, store, node_id);
                store.mark_running(node_id, inputs.clone())?;

                self.event_bus.emit(ExecutionEvent::NodeStarted {
                    execution_id,
                    node_id: node_id.clone(),
                    node_type: node.node_type().to_string(),
                    layer: depth,
                    timestamp: Utc::now(),
                });

                let ctx = NodeContext::new(
                    node_id.clone(),
                    inputs,
                    self.event_bus.create_emitter(execution_id, node_id),
                )
                .with_cancellation(token.child_token());
                attempt_logs.insert(node_id.clone(), ctx.attempts.clone());
                running.push(run_node(node, ctx));
            }

            // Barrier: the next layer starts only once all of this one is terminal.
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(FlowError::Cancelled),
                    finished = running.next() => match finished {
                        Some(finished) => self.record(execution_id, store, finished)?,
                        None => break,
                    },
                }
            }
        }
        Ok(())
    }

    fn record(
        &self,
        execution_id: ExecutionId,
        store: &mut ProvenanceStore,
        finished: FinishedNode,
    ) -> Result<(), FlowError> {
        let FinishedNode {
            node_id,
            result,
            attempts,
            duration_ms,
        } = finished;

        match result {
            Ok(output) => {
                match &output.resolution {
                    OutputResolution::DefaultOutputs { last_error } => tracing::warn!(
                        "Node {} fell back to default outputs after {} attempt(s): {}",
                        node_id,
                        attempts.len(),
                        last_error
                    ),
                    OutputResolution::ErrorHandler { status } => tracing::info!(
                        "Node {} handled status {} in {}ms",
                        node_id,
                        status,
                        duration_ms
                    ),
                    OutputResolution::Completed => {
                        tracing::info!("Node {} completed in {}ms", node_id, duration_ms)
                    }
                }

                self.event_bus.emit(ExecutionEvent::NodeCompleted {
                    execution_id,
                    node_id: node_id.clone(),
                    outputs: output.outputs.clone(),
                    duration_ms,
                    timestamp: Utc::now(),
                });
                store.record_success(&node_id, output, attempts)
            }
            Err(e) => {
                tracing::error!("Node {} failed: {}", node_id, e);

                self.event_bus.emit(ExecutionEvent::NodeFailed {
                    execution_id,
                    node_id: node_id.clone(),
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
                store.record_failure(&node_id, e, attempts)
            }
        }
    }
}

struct FinishedNode {
    node_id: NodeId,
    result: Result<NodeOutput, NodeError>,
    attempts: Vec<AttemptRecord>,
    duration_ms: u64,
}

async fn run_node(node: &dyn Node, ctx: NodeContext) -> FinishedNode {
    let node_id = ctx.node_id.clone();
    let attempts = ctx.attempts.clone();
    let start = Instant::now();

    // A panicking node fails alone instead of taking the run down with it.
    let result = AssertUnwindSafe(node.process(ctx))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(NodeError::ExecutionFailed(panic_message(panic))));

    FinishedNode {
        node_id,
        result,
        attempts: attempts.snapshot().await,
        duration_ms: start.elapsed().as_millis() as u64,
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("node panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("node panicked: {}", message)
    } else {
        "node panicked".to_string()
    }
}

fn provenance_chain<'a>(
    graph: &Graph,
    node_id: &str,
    lookup: impl Fn(&str) -> Option<&'a ExecutionRecord>,
) -> Result<IndexMap<NodeId, ExecutionRecord>, FlowError> {
    let ancestors = graph.ancestors(node_id)?;
    Ok(ancestors
        .into_iter()
        .chain(std::iter::once(node_id))
        .filter_map(|id| lookup(id).map(|record| (id.to_string(), record.clone())))
        .collect())
}

/// Result of one graph run: a record for every node
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub execution_id: ExecutionId,
    pub records: IndexMap<NodeId, ExecutionRecord>,
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn get(&self, node_id: &str) -> Option<&ExecutionRecord> {
        self.records.get(node_id)
    }

    pub fn outputs(&self, node_id: &str) -> Option<&Outputs> {
        self.get(node_id).and_then(|r| r.outputs.as_ref())
    }

    pub fn output(&self, node_id: &str, key: &str) -> Option<&Value> {
        self.get(node_id).and_then(|r| r.output(key))
    }

    pub fn succeeded_nodes(&self) -> usize {
        self.records.values().filter(|r| r.is_succeeded()).count()
    }

    pub fn failed_nodes(&self) -> usize {
        self.records.values().filter(|r| r.is_failed()).count()
    }

    pub fn total_nodes(&self) -> usize {
        self.records.len()
    }

    pub fn is_success(&self) -> bool {
        self.succeeded_nodes() == self.total_nodes()
    }

    /// Same as [`DagExecutor::get_provenance`], for this particular run
    pub fn provenance(
        &self,
        graph: &Graph,
        node_id: &str,
    ) -> Result<IndexMap<NodeId, ExecutionRecord>, FlowError> {
        provenance_chain(graph, node_id, |id| self.records.get(id))
    }
}
