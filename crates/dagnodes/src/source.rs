use async_trait::async_trait;
use dagcore::{Node, NodeContext, NodeError, NodeId, NodeOutput, Outputs, Value};
use dagruntime::{ConfigField, NodeFactory, NodeMetadata};

/// Seeds constant values into a graph; its outputs are its configuration
pub struct SourceNode {
    id: NodeId,
    outputs: Outputs,
}

impl SourceNode {
    pub fn new(id: impl Into<NodeId>, outputs: Outputs) -> Self {
        Self {
            id: id.into(),
            outputs,
        }
    }

    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.insert(key.into(), value.into());
        self
    }

    pub fn outputs(&self) -> &Outputs {
        &self.outputs
    }
}

#[async_trait]
impl Node for SourceNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn node_type(&self) -> &str {
        "source"
    }

    async fn process(&self, _ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        Ok(NodeOutput::from_outputs(self.outputs.clone()))
    }
}

pub struct SourceNodeFactory;

impl NodeFactory for SourceNodeFactory {
    fn create(&self, id: &str, config: &serde_json::Value) -> Result<Box<dyn Node>, NodeError> {
        let outputs = match config {
            serde_json::Value::Null => Outputs::new(),
            serde_json::Value::Object(map) => map
                .iter()
                .map(|(k, v)| (k.clone(), Value::from(v.clone())))
                .collect(),
            other => {
                return Err(NodeError::Configuration(format!(
                    "source config must be an object, got {}",
                    other
                )))
            }
        };
        Ok(Box::new(SourceNode::new(id, outputs)))
    }

    fn node_type(&self) -> &str {
        "source"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Emit the configured key/value pairs unchanged".to_string(),
            category: "source".to_string(),
            config: vec![ConfigField::optional(
                "<any key>",
                "each config entry becomes an output",
            )],
        }
    }
}
