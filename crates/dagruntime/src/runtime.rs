use crate::{registry::NodeRegistry, DagExecutor, ExecutionResult};
use dagcore::{EventBus, FlowError, Graph, GraphDefinition};
use std::sync::Arc;
use std::time::Duration;

/// Main runtime: turns graph definitions into executors sharing one event bus
pub struct FlowRuntime {
    registry: NodeRegistry,
    config: RuntimeConfig,
    event_bus: Arc<EventBus>,
}

impl FlowRuntime {
    /// Create a new runtime with default settings
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a new runtime with custom configuration
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self::with_registry(NodeRegistry::new(), config)
    }

    /// Create a new runtime with a pre-configured registry
    pub fn with_registry(registry: NodeRegistry, config: RuntimeConfig) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        Self {
            registry,
            config,
            event_bus,
        }
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Access to the node registry for registering node types
    pub fn registry_mut(&mut self) -> &mut NodeRegistry {
        &mut self.registry
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Build and validate a graph from its definition
    pub fn load(&self, definition: &GraphDefinition) -> Result<Graph, FlowError> {
        let graph = self.registry.build_graph(definition)?;
        graph.validate()?;
        Ok(graph)
    }

    /// Executor for `graph` publishing on this runtime's event bus
    pub fn executor(&self, graph: Graph) -> DagExecutor {
        DagExecutor::with_config(graph, self.config.clone()).with_event_bus(self.event_bus.clone())
    }

    /// Load and run a definition in one step
    pub async fn execute(&self, definition: &GraphDefinition) -> Result<ExecutionResult, FlowError> {
        let graph = self.load(definition)?;
        self.executor(graph).execute().await
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<dagcore::ExecutionEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}

impl Default for FlowRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub event_buffer_size: usize,
    /// Whole-run time limit; `None` runs to completion
    pub max_execution_time: Option<Duration>,
}

impl RuntimeConfig {
    pub fn with_max_execution_time(mut self, limit: Duration) -> Self {
        self.max_execution_time = Some(limit);
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 1000,
            max_execution_time: None,
        }
    }
}
