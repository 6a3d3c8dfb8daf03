//! HTTP-calling node and its request/response pipeline

mod client;
mod node;
mod path;
mod template;

pub use client::{
    HttpClient, HttpMethod, HttpResponse, ReqwestClient, ReqwestClientBuilder, TransportError,
};
pub use node::{
    BodyFn, HttpCallNode, HttpCallNodeBuilder, HttpCallNodeFactory, OutputSpec, RetryPolicy,
    StatusHandler,
};
pub use path::{extract, JsonPath, PathError};
pub use template::UrlTemplate;
