use crate::{Node, NodeId, WorkflowError};
use indexmap::{IndexMap, IndexSet};
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Bfs, Reversed};
use std::collections::HashMap;
use std::fmt;

/// A directed acyclic graph of nodes.
///
/// The graph owns its nodes. Edges are a set of `(from, to)` pairs meaning
/// "`to` consumes the outputs of `from`". Cycles are refused at
/// [`Graph::add_edge`], so a constructed graph is always schedulable.
pub struct Graph {
    name: String,
    nodes: IndexMap<NodeId, Box<dyn Node>>,
    edges: IndexSet<(NodeId, NodeId)>,
    topology: DiGraph<NodeId, ()>,
    index: HashMap<NodeId, NodeIndex>,
}

impl Graph {
    pub fn new() -> Self {
        Self::named("graph")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: IndexMap::new(),
            edges: IndexSet::new(),
            topology: DiGraph::new(),
            index: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_node<N: Node + 'static>(&mut self, node: N) -> Result<(), WorkflowError> {
        self.add_boxed_node(Box::new(node))
    }

    pub fn add_boxed_node(&mut self, node: Box<dyn Node>) -> Result<(), WorkflowError> {
        let id = node.id().to_string();
        if id.is_empty() || id.contains('.') {
            return Err(WorkflowError::InvalidNodeId(id));
        }
        if self.nodes.contains_key(&id) {
            return Err(WorkflowError::DuplicateNode(id));
        }

        let idx = self.topology.add_node(id.clone());
        self.index.insert(id.clone(), idx);
        self.nodes.insert(id, node);
        Ok(())
    }

    /// Register that `to` depends on `from`.
    ///
    /// Re-adding an existing edge is a no-op.
    pub fn add_edge(&mut self, from: &str, to: &str) -> Result<(), WorkflowError> {
        let from_idx = self.index_of(from)?;
        let to_idx = self.index_of(to)?;

        let edge = (from.to_string(), to.to_string());
        if self.edges.contains(&edge) {
            tracing::debug!("Edge {} -> {} already present", from, to);
            return Ok(());
        }

        // `from` reachable from `to` means the new edge closes a loop.
        if from_idx == to_idx || has_path_connecting(&self.topology, to_idx, from_idx, None) {
            return Err(WorkflowError::Cycle {
                from: edge.0,
                to: edge.1,
            });
        }

        self.topology.add_edge(from_idx, to_idx, ());
        self.edges.insert(edge);
        Ok(())
    }

    pub fn node(&self, id: &str) -> Option<&dyn Node> {
        self.nodes.get(id).map(|n| n.as_ref())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Node ids in registration order
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Edges in insertion order
    pub fn edges(&self) -> impl Iterator<Item = (&str, &str)> {
        self.edges.iter().map(|(f, t)| (f.as_str(), t.as_str()))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Direct predecessors of `id`, in edge-insertion order
    pub fn predecessors(&self, id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|(_, to)| to == id)
            .map(|(from, _)| from.as_str())
            .collect()
    }

    /// Direct dependents of `id`, in edge-insertion order
    pub fn successors(&self, id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|(from, _)| from == id)
            .map(|(_, to)| to.as_str())
            .collect()
    }

    /// Every transitive predecessor of `id`, in registration order
    pub fn ancestors(&self, id: &str) -> Result<Vec<&str>, WorkflowError> {
        let start = self.index_of(id)?;
        let reversed = Reversed(&self.topology);
        let mut bfs = Bfs::new(reversed, start);

        let mut found = IndexSet::new();
        while let Some(idx) = bfs.next(reversed) {
            if idx != start {
                found.insert(self.topology[idx].as_str());
            }
        }

        Ok(self
            .node_ids()
            .filter(|node_id| found.contains(node_id))
            .collect())
    }

    /// Partition nodes into layers such that every node's predecessors sit
    /// in strictly earlier layers (Kahn's algorithm).
    ///
    /// Within a layer, nodes keep registration order.
    pub fn topological_layers(&self) -> Result<Vec<Vec<NodeId>>, WorkflowError> {
        let mut in_degree: IndexMap<&str, usize> = self.node_ids().map(|id| (id, 0)).collect();
        for (from, to) in &self.edges {
            if !self.nodes.contains_key(from) {
                return Err(WorkflowError::UnknownNode(from.clone()));
            }
            match in_degree.get_mut(to.as_str()) {
                Some(degree) => *degree += 1,
                None => return Err(WorkflowError::UnknownNode(to.clone())),
            }
        }

        let mut layers = Vec::new();
        let mut placed = 0;
        loop {
            let layer: Vec<NodeId> = in_degree
                .iter()
                .filter(|(_, degree)| **degree == 0)
                .map(|(id, _)| id.to_string())
                .collect();
            if layer.is_empty() {
                break;
            }

            for id in &layer {
                in_degree.shift_remove(id.as_str());
                for successor in self.successors(id) {
                    if let Some(degree) = in_degree.get_mut(successor) {
                        *degree -= 1;
                    }
                }
            }
            placed += layer.len();
            layers.push(layer);
        }

        if placed < self.nodes.len() {
            let (from, to) = self
                .edges
                .iter()
                .find(|(f, t)| in_degree.contains_key(f.as_str()) && in_degree.contains_key(t.as_str()))
                .cloned()
                .unwrap_or_default();
            return Err(WorkflowError::Cycle { from, to });
        }

        Ok(layers)
    }

    /// Check the graph is schedulable
    pub fn validate(&self) -> Result<(), WorkflowError> {
        self.topological_layers().map(|_| ())
    }

    fn index_of(&self, id: &str) -> Result<NodeIndex, WorkflowError> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| WorkflowError::UnknownNode(id.to_string()))
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("name", &self.name)
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .field("edges", &self.edges)
            .finish()
    }
}
