use async_trait::async_trait;
use dagcore::{Node, NodeContext, NodeError, NodeId, NodeInputs, NodeOutput, Outputs, Value};
use dagruntime::{NodeFactory, NodeMetadata};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// User-supplied transform over a node's inputs
pub type TransformFn = Arc<dyn Fn(&NodeInputs) -> anyhow::Result<Outputs> + Send + Sync>;

/// Pure, synchronous computation over predecessor outputs.
///
/// The function sees both input views: `inputs.get("key")` for the flat
/// view and `inputs.get_qualified("node.key")` for the qualified one.
/// Errors and panics become [`NodeError::Transform`]; there is no retry.
pub struct TransformNode {
    id: NodeId,
    node_type: String,
    function: TransformFn,
}

impl TransformNode {
    pub fn new<F>(id: impl Into<NodeId>, function: F) -> Self
    where
        F: Fn(&NodeInputs) -> anyhow::Result<Outputs> + Send + Sync + 'static,
    {
        Self::from_fn(id, Arc::new(function))
    }

    pub fn from_fn(id: impl Into<NodeId>, function: TransformFn) -> Self {
        Self {
            id: id.into(),
            node_type: "transform".to_string(),
            function,
        }
    }

    /// Report a more specific type name in records and events
    pub fn with_type(mut self, node_type: impl Into<String>) -> Self {
        self.node_type = node_type.into();
        self
    }

    fn apply(&self, inputs: &NodeInputs) -> Result<Outputs, NodeError> {
        match catch_unwind(AssertUnwindSafe(|| (self.function)(inputs))) {
            Ok(Ok(outputs)) => Ok(outputs),
            Ok(Err(e)) => Err(NodeError::Transform(format!("{:#}", e))),
            Err(_) => Err(NodeError::Transform("transform function panicked".to_string())),
        }
    }
}

#[async_trait]
impl Node for TransformNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn node_type(&self) -> &str {
        &self.node_type
    }

    async fn process(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        self.apply(&ctx.inputs).map(NodeOutput::from_outputs)
    }
}

/// Makes a named transform function available to graph definitions
pub struct TransformFactory {
    node_type: String,
    description: String,
    function: TransformFn,
}

impl TransformFactory {
    pub fn new<F>(node_type: impl Into<String>, description: impl Into<String>, function: F) -> Self
    where
        F: Fn(&NodeInputs) -> anyhow::Result<Outputs> + Send + Sync + 'static,
    {
        Self {
            node_type: node_type.into(),
            description: description.into(),
            function: Arc::new(function),
        }
    }

    /// `transform.sum`: `{sum}` of every numeric flat input
    pub fn sum() -> Self {
        Self::new(
            "transform.sum",
            "Sum every numeric input into 'sum'",
            |inputs| {
                let sum: f64 = numbers(inputs).sum();
                Ok(Outputs::from([("sum".to_string(), Value::from(sum))]))
            },
        )
    }

    /// `transform.product`: `{product}` of every numeric flat input
    pub fn product() -> Self {
        Self::new(
            "transform.product",
            "Multiply every numeric input into 'product'",
            |inputs| {
                let product: f64 = numbers(inputs).product();
                Ok(Outputs::from([("product".to_string(), Value::from(product))]))
            },
        )
    }
}

fn numbers(inputs: &NodeInputs) -> impl Iterator<Item = f64> + '_ {
    inputs.flat().values().filter_map(Value::as_f64)
}

impl NodeFactory for TransformFactory {
    fn create(&self, id: &str, _config: &serde_json::Value) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(
            TransformNode::from_fn(id, self.function.clone()).with_type(self.node_type.clone()),
        ))
    }

    fn node_type(&self) -> &str {
        &self.node_type
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: self.description.clone(),
            category: "transform".to_string(),
            config: Vec::new(),
        }
    }
}
