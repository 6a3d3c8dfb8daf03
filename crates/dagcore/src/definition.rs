use crate::NodeId;
use serde::{Deserialize, Serialize};

/// Declarative graph document, the form graphs take on disk.
///
/// The runtime's `NodeRegistry` turns each node
/// definition into a node instance by its `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub nodes: Vec<NodeDefinition>,
    #[serde(default)]
    pub edges: Vec<EdgeDefinition>,
}

impl GraphDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn with_node(mut self, node: NodeDefinition) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_edge(mut self, from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        self.edges.push(EdgeDefinition {
            from: from.into(),
            to: to.into(),
        });
        self
    }

    pub fn find_node(&self, id: &str) -> Option<&NodeDefinition> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

impl NodeDefinition {
    pub fn new(id: impl Into<NodeId>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            config: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeDefinition {
    pub from: NodeId,
    pub to: NodeId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_document() {
        let doc = json!({
            "name": "lookup",
            "nodes": [
                {"id": "input", "type": "source", "config": {"id": "123"}},
                {"id": "fetch", "type": "http.call", "config": {"url_template": "https://x/${id}"}}
            ],
            "edges": [{"from": "input", "to": "fetch"}]
        });

        let def: GraphDefinition = serde_json::from_value(doc).unwrap();
        assert_eq!(def.nodes.len(), 2);
        assert_eq!(def.find_node("fetch").unwrap().node_type, "http.call");
        assert_eq!(def.edges[0].to, "fetch");
        assert!(def.description.is_none());
    }
}
