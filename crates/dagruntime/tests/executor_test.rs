// crates/dagruntime/tests/executor_test.rs

use async_trait::async_trait;
use dagcore::{
    ExecutionEvent, FlowError, Graph, Node, NodeContext, NodeError, NodeInputs, NodeOutput,
    NodeStatus, Outputs, Value, WorkflowError,
};
use dagruntime::{DagExecutor, RuntimeConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_test_writer()
        .try_init();
}

type Behaviour = Arc<dyn Fn(&NodeInputs) -> Result<Outputs, NodeError> + Send + Sync>;

/// Test node driven by a closure over its inputs
struct FnNode {
    id: String,
    behaviour: Behaviour,
    calls: Arc<AtomicUsize>,
}

impl FnNode {
    fn new<F>(id: &str, behaviour: F) -> Self
    where
        F: Fn(&NodeInputs) -> Result<Outputs, NodeError> + Send + Sync + 'static,
    {
        Self {
            id: id.to_string(),
            behaviour: Arc::new(behaviour),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn constant(id: &str, pairs: &[(&str, f64)]) -> Self {
        let outputs: Outputs = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::from(*v)))
            .collect();
        Self::new(id, move |_| Ok(outputs.clone()))
    }

    fn failing(id: &str) -> Self {
        Self::new(id, |_| Err(NodeError::Transform("boom".into())))
    }
}

#[async_trait]
impl Node for FnNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn node_type(&self) -> &str {
        "test.fn"
    }

    async fn process(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.behaviour)(&ctx.inputs).map(NodeOutput::from_outputs)
    }
}

/// Sleeps before producing `{done: true}`
struct SlowNode {
    id: String,
    delay: Duration,
}

#[async_trait]
impl Node for SlowNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn node_type(&self) -> &str {
        "test.slow"
    }

    async fn process(&self, _ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        tokio::time::sleep(self.delay).await;
        Ok(NodeOutput::new().with_output("done", true))
    }
}

struct PanicNode(&'static str);

#[async_trait]
impl Node for PanicNode {
    fn id(&self) -> &str {
        self.0
    }

    fn node_type(&self) -> &str {
        "test.panic"
    }

    async fn process(&self, _ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        panic!("exploded on purpose");
    }
}

fn sum_of_flat(inputs: &NodeInputs) -> Result<Outputs, NodeError> {
    let sum: f64 = inputs.flat().values().filter_map(Value::as_f64).sum();
    Ok(Outputs::from([("sum".to_string(), Value::from(sum))]))
}

fn fan_in_graph() -> Graph {
    let mut graph = Graph::named("fan-in");
    graph
        .add_node(FnNode::constant("source1", &[("x", 5.0), ("y", 3.0)]))
        .unwrap();
    graph
        .add_node(FnNode::constant("source2", &[("x", 2.0), ("y", 4.0)]))
        .unwrap();
    graph.add_node(FnNode::new("add1", sum_of_flat)).unwrap();
    graph.add_node(FnNode::new("add2", sum_of_flat)).unwrap();
    graph
        .add_node(FnNode::new("mult", |inputs| {
            let left = inputs.get_from("add1", "sum").and_then(Value::as_f64);
            let right = inputs.get_from("add2", "sum").and_then(Value::as_f64);
            match (left, right) {
                (Some(l), Some(r)) => Ok(Outputs::from([("product".to_string(), Value::from(l * r))])),
                _ => Err(NodeError::Transform("missing operand".into())),
            }
        }))
        .unwrap();
    graph.add_edge("source1", "add1").unwrap();
    graph.add_edge("source2", "add2").unwrap();
    graph.add_edge("add1", "mult").unwrap();
    graph.add_edge("add2", "mult").unwrap();
    graph
}

#[tokio::test]
async fn test_fan_in_arithmetic() -> anyhow::Result<()> {
    init_tracing();

    let executor = DagExecutor::new(fan_in_graph());
    let result = executor.execute().await?;

    assert!(result.is_success());
    assert_eq!(result.total_nodes(), 5);
    assert_eq!(result.output("add1", "sum"), Some(&Value::from(8.0)));
    assert_eq!(result.output("add2", "sum"), Some(&Value::from(6.0)));
    assert_eq!(result.output("mult", "product"), Some(&Value::from(48.0)));

    // Two predecessors: the flat view is qualified as well
    let mult = result.get("mult").unwrap();
    assert_eq!(mult.inputs.get("add1.sum"), Some(&Value::from(8.0)));
    assert_eq!(mult.inputs.get_qualified("add2.sum"), Some(&Value::from(6.0)));
    assert!(mult.inputs.get("sum").is_none());

    // One predecessor: unqualified
    let add1 = result.get("add1").unwrap();
    assert_eq!(add1.inputs.get("x"), Some(&Value::from(5.0)));
    assert_eq!(add1.inputs.get_from("source1", "y"), Some(&Value::from(3.0)));
    Ok(())
}

#[tokio::test]
async fn test_every_node_gets_one_terminal_record() -> anyhow::Result<()> {
    let mut graph = fan_in_graph();
    graph.add_node(FnNode::failing("lonely")).unwrap();

    let result = DagExecutor::new(graph).execute().await?;
    assert_eq!(result.total_nodes(), 6);
    assert!(result.records.values().all(|r| r.status.is_terminal()));
    assert_eq!(result.failed_nodes(), 1);
    assert_eq!(result.succeeded_nodes(), 5);

    for record in result.records.values() {
        assert_eq!(record.outputs.is_some(), record.is_succeeded());
        assert_eq!(record.error.is_some(), record.is_failed());
        assert!(record.started_at.is_some());
        assert!(record.finished_at.is_some());
        assert_eq!(record.attempt_count, 1);
    }
    Ok(())
}

#[tokio::test]
async fn test_failure_does_not_stop_independent_branches() -> anyhow::Result<()> {
    let mut graph = Graph::new();
    graph.add_node(FnNode::failing("broken")).unwrap();
    graph.add_node(FnNode::constant("healthy", &[("v", 1.0)])).unwrap();
    graph.add_node(FnNode::new("after_broken", sum_of_flat)).unwrap();
    graph.add_node(FnNode::new("after_healthy", sum_of_flat)).unwrap();
    graph.add_edge("broken", "after_broken").unwrap();
    graph.add_edge("healthy", "after_healthy").unwrap();

    let result = DagExecutor::new(graph).execute().await?;

    assert_eq!(
        result.get("broken").unwrap().error,
        Some(NodeError::Transform("boom".into()))
    );
    assert_eq!(result.output("after_healthy", "sum"), Some(&Value::from(1.0)));

    // The dependent of the failed node still runs, with nothing to read
    let after_broken = result.get("after_broken").unwrap();
    assert_eq!(after_broken.status, NodeStatus::Succeeded);
    assert!(after_broken.inputs.is_empty());
    assert_eq!(after_broken.output("sum"), Some(&Value::from(0.0)));
    Ok(())
}

#[tokio::test]
async fn test_failed_predecessor_leaves_partial_inputs() -> anyhow::Result<()> {
    let mut graph = Graph::new();
    graph.add_node(FnNode::constant("good", &[("v", 2.0)])).unwrap();
    graph.add_node(FnNode::failing("bad")).unwrap();
    graph.add_node(FnNode::new("join", sum_of_flat)).unwrap();
    graph.add_edge("good", "join").unwrap();
    graph.add_edge("bad", "join").unwrap();

    let result = DagExecutor::new(graph).execute().await?;
    let join = result.get("join").unwrap();

    assert!(join.is_succeeded());
    assert_eq!(join.inputs.len(), 1);
    // Still qualified: the failed predecessor counts toward the addressing style
    assert_eq!(join.inputs.get("good.v"), Some(&Value::from(2.0)));
    assert!(join.inputs.get("v").is_none());
    Ok(())
}

#[tokio::test]
async fn test_only_direct_predecessors_are_visible() -> anyhow::Result<()> {
    let mut graph = Graph::new();
    graph.add_node(FnNode::constant("a", &[("from_a", 1.0)])).unwrap();
    graph
        .add_node(FnNode::new("b", |inputs| {
            let v = inputs.get("from_a").and_then(Value::as_f64).unwrap_or_default();
            Ok(Outputs::from([("from_b".to_string(), Value::from(v + 1.0))]))
        }))
        .unwrap();
    graph.add_node(FnNode::new("c", sum_of_flat)).unwrap();
    graph.add_edge("a", "b").unwrap();
    graph.add_edge("b", "c").unwrap();

    let result = DagExecutor::new(graph).execute().await?;
    let c = result.get("c").unwrap();
    assert_eq!(c.inputs.get("from_b"), Some(&Value::from(2.0)));
    assert!(c.inputs.lookup("from_a").is_none());
    assert!(c.inputs.get_from("a", "from_a").is_none());
    Ok(())
}

#[tokio::test]
async fn test_repeated_runs_are_identical() -> anyhow::Result<()> {
    let executor = DagExecutor::new(fan_in_graph());

    let first = executor.execute().await?;
    let second = executor.execute().await?;

    assert_ne!(first.execution_id, second.execution_id);
    for (node_id, record) in &first.records {
        let again = second.get(node_id).unwrap();
        assert_eq!(record.status, again.status);
        assert_eq!(record.outputs, again.outputs);
        assert_eq!(record.inputs, again.inputs);
    }
    Ok(())
}

#[tokio::test]
async fn test_each_node_runs_once_per_execution() -> anyhow::Result<()> {
    let node = FnNode::constant("counted", &[("v", 1.0)]);
    let calls = node.calls.clone();

    let mut graph = Graph::new();
    graph.add_node(node).unwrap();
    graph.add_node(FnNode::new("down1", sum_of_flat)).unwrap();
    graph.add_node(FnNode::new("down2", sum_of_flat)).unwrap();
    graph.add_edge("counted", "down1").unwrap();
    graph.add_edge("counted", "down2").unwrap();

    let executor = DagExecutor::new(graph);
    executor.execute().await?;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    executor.execute().await?;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    Ok(())
}

#[test]
fn test_cycle_is_rejected_when_wiring() {
    let mut graph = Graph::new();
    graph.add_node(FnNode::constant("a", &[])).unwrap();
    graph.add_node(FnNode::constant("b", &[])).unwrap();
    graph.add_edge("a", "b").unwrap();

    let err = graph.add_edge("b", "a").unwrap_err();
    assert_eq!(
        err,
        WorkflowError::Cycle {
            from: "b".into(),
            to: "a".into()
        }
    );
    // The rejected edge left no trace
    assert_eq!(graph.edges().count(), 1);
}

#[tokio::test]
async fn test_provenance_chain() -> anyhow::Result<()> {
    let executor = DagExecutor::new(fan_in_graph());

    assert!(matches!(
        executor.get_provenance("mult").await,
        Err(FlowError::NotExecuted)
    ));

    executor.execute().await?;

    let chain = executor.get_provenance("mult").await?;
    let ids: Vec<&str> = chain.keys().map(String::as_str).collect();
    assert_eq!(ids, vec!["source1", "source2", "add1", "add2", "mult"]);
    assert_eq!(chain["source1"].output("x"), Some(&Value::from(5.0)));

    let chain = executor.get_provenance("add2").await?;
    let ids: Vec<&str> = chain.keys().map(String::as_str).collect();
    assert_eq!(ids, vec!["source2", "add2"]);

    assert!(matches!(
        executor.get_provenance("nope").await,
        Err(FlowError::Workflow(WorkflowError::UnknownNode(_)))
    ));
    Ok(())
}

#[tokio::test]
async fn test_panicking_node_fails_alone() -> anyhow::Result<()> {
    let mut graph = Graph::new();
    graph.add_node(PanicNode("kaboom")).unwrap();
    graph.add_node(FnNode::constant("fine", &[("v", 1.0)])).unwrap();

    let result = DagExecutor::new(graph).execute().await?;

    let kaboom = result.get("kaboom").unwrap();
    assert!(kaboom.is_failed());
    match &kaboom.error {
        Some(NodeError::ExecutionFailed(message)) => assert!(message.contains("exploded on purpose")),
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(result.get("fine").unwrap().is_succeeded());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_timeout_marks_in_flight_nodes_cancelled() {
    let mut graph = Graph::new();
    graph.add_node(FnNode::constant("quick", &[("v", 1.0)])).unwrap();
    graph
        .add_node(SlowNode {
            id: "slow".into(),
            delay: Duration::from_secs(60),
        })
        .unwrap();
    graph.add_node(FnNode::new("after", sum_of_flat)).unwrap();
    graph.add_edge("quick", "slow").unwrap();
    graph.add_edge("slow", "after").unwrap();

    let config = RuntimeConfig::default().with_max_execution_time(Duration::from_secs(5));
    let executor = DagExecutor::with_config(graph, config);

    let err = executor.execute().await.unwrap_err();
    assert!(matches!(err, FlowError::Timeout { millis: 5000 }));

    let chain = executor.get_provenance("after").await.unwrap();
    assert_eq!(chain["quick"].status, NodeStatus::Succeeded);
    assert_eq!(chain["slow"].status, NodeStatus::Failed);
    assert_eq!(chain["slow"].error, Some(NodeError::Cancelled));
    assert_eq!(chain["after"].status, NodeStatus::Pending);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_the_run() {
    let mut graph = Graph::new();
    graph
        .add_node(SlowNode {
            id: "slow".into(),
            delay: Duration::from_secs(60),
        })
        .unwrap();

    let executor = DagExecutor::new(graph);
    let token = executor.cancellation_token();

    let (outcome, _) = tokio::join!(executor.execute(), async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();
    });

    assert!(matches!(outcome, Err(FlowError::Cancelled)));
    let chain = executor.get_provenance("slow").await.unwrap();
    assert_eq!(chain["slow"].error, Some(NodeError::Cancelled));
}

#[tokio::test]
async fn test_events_bracket_the_run() -> anyhow::Result<()> {
    let executor = DagExecutor::new(fan_in_graph());
    let mut events = executor.subscribe_events();

    let result = executor.execute().await?;

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }

    assert!(matches!(seen.first(), Some(ExecutionEvent::RunStarted { node_count: 5, .. })));
    match seen.last() {
        Some(ExecutionEvent::RunCompleted {
            execution_id,
            succeeded,
            failed,
            ..
        }) => {
            assert_eq!(*execution_id, result.execution_id);
            assert_eq!(*succeeded, 5);
            assert_eq!(*failed, 0);
        }
        other => panic!("unexpected last event: {:?}", other),
    }

    let started = seen
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::NodeStarted { .. }))
        .count();
    let completed = seen
        .iter()
        .filter(|e| e.node_status() == Some(NodeStatus::Succeeded))
        .count();
    assert_eq!(started, 5);
    assert_eq!(completed, 5);

    // A node never starts before its predecessors complete
    let position = |node_id: &str, status: NodeStatus| {
        seen.iter()
            .position(|e| e.node_id() == Some(node_id) && e.node_status() == Some(status))
    };
    let add1_done = position("add1", NodeStatus::Succeeded).unwrap();
    let add2_done = position("add2", NodeStatus::Succeeded).unwrap();
    let mult_started = position("mult", NodeStatus::Running).unwrap();
    assert!(add1_done < mult_started);
    assert!(add2_done < mult_started);
    Ok(())
}
