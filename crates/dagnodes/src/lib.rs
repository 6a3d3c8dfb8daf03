//! Standard node library
//!
//! Source, transform and HTTP-call nodes, plus the factories that make them
//! available to graph definitions.

mod http;
mod source;
mod transform;

pub use http::{
    extract, BodyFn, HttpCallNode, HttpCallNodeBuilder, HttpCallNodeFactory, HttpClient,
    HttpMethod, HttpResponse, JsonPath, OutputSpec, PathError, ReqwestClient,
    ReqwestClientBuilder, RetryPolicy, StatusHandler, TransportError, UrlTemplate,
};
pub use source::{SourceNode, SourceNodeFactory};
pub use transform::{TransformFactory, TransformFn, TransformNode};

use dagruntime::NodeRegistry;
use std::sync::Arc;

/// Register all standard nodes with a registry, using a default HTTP client
pub fn register_all(registry: &mut NodeRegistry) {
    register_all_with_client(registry, Arc::new(ReqwestClient::new()));
}

/// Register all standard nodes; `http.call` nodes send through `client`
pub fn register_all_with_client(registry: &mut NodeRegistry, client: Arc<dyn HttpClient>) {
    registry.register(Arc::new(SourceNodeFactory));
    registry.register(Arc::new(HttpCallNodeFactory::new(client)));
    registry.register(Arc::new(TransformFactory::sum()));
    registry.register(Arc::new(TransformFactory::product()));
}
