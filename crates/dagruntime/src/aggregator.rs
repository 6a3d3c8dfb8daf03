use crate::ProvenanceStore;
use dagcore::{Graph, NodeInputs};

/// Resolves the inputs a node sees from its direct predecessors' recorded
/// outputs.
///
/// One predecessor: its outputs, unqualified. Several: every output under
/// `"<predecessor>.<key>"`. None: empty. The qualified view is always
/// present as well. A predecessor without recorded outputs (failed, or not
/// yet run) contributes nothing but still counts toward the predecessor
/// total, so the addressing style never depends on what failed.
pub struct InputAggregator;

impl InputAggregator {
    pub fn resolve(graph: &Graph, provenance: &ProvenanceStore, node_id: &str) -> NodeInputs {
        let predecessors = graph.predecessors(node_id);
        let available = predecessors
            .iter()
            .filter_map(|pred| provenance.outputs(pred).map(|outputs| (*pred, outputs)));

        NodeInputs::from_predecessors(predecessors.len(), available)
    }
}
