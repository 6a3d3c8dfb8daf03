//! Graph execution runtime
//!
//! This crate provides the execution engine that runs graphs: input
//! aggregation, the layered scheduler, provenance recording, and the
//! registry that builds graphs from declarative definitions.

mod aggregator;
mod executor;
mod provenance;
mod registry;
mod runtime;

pub use aggregator::InputAggregator;
pub use executor::{DagExecutor, ExecutionResult};
pub use provenance::{ExecutionRecord, ProvenanceStore};
pub use registry::{ConfigField, NodeFactory, NodeMetadata, NodeRegistry};
pub use runtime::{FlowRuntime, RuntimeConfig};
