use dagcore::{Graph, GraphDefinition, Node, NodeError, WorkflowError};
use std::collections::HashMap;
use std::sync::Arc;

/// Factory trait for creating node instances from declarative config
pub trait NodeFactory: Send + Sync {
    /// Create a new instance of the node with the given id and configuration
    fn create(&self, id: &str, config: &serde_json::Value) -> Result<Box<dyn Node>, NodeError>;

    /// Get node type identifier
    fn node_type(&self) -> &str;

    /// Optional: Get node metadata (description, accepted config keys)
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::default()
    }
}

/// Metadata about a node type
#[derive(Debug, Clone)]
pub struct NodeMetadata {
    pub description: String,
    pub category: String,
    pub config: Vec<ConfigField>,
}

impl Default for NodeMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
            config: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfigField {
    pub name: String,
    pub description: String,
    pub required: bool,
}

impl ConfigField {
    pub fn required(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            required: true,
        }
    }

    pub fn optional(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            required: false,
        }
    }
}

/// Registry of available node types
#[derive(Clone)]
pub struct NodeRegistry {
    factories: HashMap<String, Arc<dyn NodeFactory>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a node factory, replacing any previous one of the same type
    pub fn register(&mut self, factory: Arc<dyn NodeFactory>) {
        let node_type = factory.node_type().to_string();
        tracing::info!("Registering node type: {}", node_type);
        self.factories.insert(node_type, factory);
    }

    /// Create a node instance from a node type and config
    pub fn create_node(
        &self,
        id: &str,
        node_type: &str,
        config: &serde_json::Value,
    ) -> Result<Box<dyn Node>, WorkflowError> {
        let factory = self
            .factories
            .get(node_type)
            .ok_or_else(|| WorkflowError::UnknownNodeType(node_type.to_string()))?;

        factory
            .create(id, config)
            .map_err(|e| WorkflowError::Invalid(format!("Failed to create node '{}': {}", id, e)))
    }

    /// Instantiate every node of a definition and wire its edges
    pub fn build_graph(&self, definition: &GraphDefinition) -> Result<Graph, WorkflowError> {
        let mut graph = Graph::named(definition.name.clone());
        for node in &definition.nodes {
            let instance = self.create_node(&node.id, &node.node_type, &node.config)?;
            if instance.id() != node.id {
                return Err(WorkflowError::Invalid(format!(
                    "factory for '{}' produced node '{}' for id '{}'",
                    node.node_type,
                    instance.id(),
                    node.id
                )));
            }
            graph.add_boxed_node(instance)?;
        }
        for edge in &definition.edges {
            graph.add_edge(&edge.from, &edge.to)?;
        }
        Ok(graph)
    }

    /// Get all registered node types, sorted
    pub fn list_node_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    /// Get metadata for a node type
    pub fn get_metadata(&self, node_type: &str) -> Option<NodeMetadata> {
        self.factories.get(node_type).map(|f| f.metadata())
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
