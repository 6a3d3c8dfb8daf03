use super::client::{HttpClient, HttpMethod, HttpResponse, ReqwestClient};
use super::path::JsonPath;
use super::template::UrlTemplate;
use async_trait::async_trait;
use chrono::Utc;
use dagcore::{
    AttemptRecord, Node, NodeContext, NodeError, NodeId, NodeInputs, NodeOutput,
    OutputResolution, Outputs, Value,
};
use dagruntime::{ConfigField, NodeFactory, NodeMetadata};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::time::sleep;

/// Substitute outputs for a given response status, computed from the inputs
pub type StatusHandler = Arc<dyn Fn(&NodeInputs) -> Outputs + Send + Sync>;

/// Computes one output from the parsed response body
pub type BodyFn = Arc<dyn Fn(&serde_json::Value) -> Value + Send + Sync>;

/// How one output is derived from a successful response
#[derive(Clone)]
pub enum OutputSpec {
    Path(JsonPath),
    Function(BodyFn),
}

impl OutputSpec {
    fn evaluate(&self, key: &str, body: &serde_json::Value) -> Result<Value, NodeError> {
        match self {
            OutputSpec::Path(path) => path
                .extract(body)
                .map(Value::from)
                .map_err(|e| NodeError::Extraction {
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
            OutputSpec::Function(function) => Ok(function(body)),
        }
    }
}

/// Retry schedule for transient failures
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts allowed after the first
    pub retry_count: u32,
    pub retry_delay: Duration,
    /// Growth factor applied to the delay on each further retry
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    pub fn new(retry_count: u32, retry_delay: Duration) -> Self {
        Self {
            retry_count,
            retry_delay,
            backoff_multiplier: 1.0,
        }
    }

    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.backoff_multiplier.powi(exponent);
        let nanos = (self.retry_delay.as_nanos() as f64 * factor).round();
        Duration::from_nanos(nanos.min(u64::MAX as f64) as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Calls a remote API and maps the response into outputs.
///
/// Per attempt: render the URL, take a throttle permit, send. A 2xx body is
/// run through the output map (extraction failures are final). A status
/// with a registered handler returns the handler's outputs at once. Anything
/// else is retried per the [`RetryPolicy`]; when retries run out the node
/// returns its default outputs, or fails with `RequestFailed`.
pub struct HttpCallNode {
    id: NodeId,
    url: UrlTemplate,
    method: HttpMethod,
    output_map: BTreeMap<String, OutputSpec>,
    error_handlers: HashMap<u16, StatusHandler>,
    default_outputs: Option<Outputs>,
    template_defaults: Outputs,
    retry: RetryPolicy,
    throttle: Semaphore,
    max_concurrent_requests: usize,
    client: Arc<dyn HttpClient>,
}

impl HttpCallNode {
    pub fn builder(id: impl Into<NodeId>, url_template: impl Into<String>) -> HttpCallNodeBuilder {
        HttpCallNodeBuilder::new(id, url_template)
    }

    pub fn url_template(&self) -> &str {
        self.url.as_str()
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn max_concurrent_requests(&self) -> usize {
        self.max_concurrent_requests
    }

    /// Resolve the URL this node would request for `inputs`
    pub fn resolve_url(&self, inputs: &NodeInputs) -> Result<String, NodeError> {
        self.url.render(inputs, &self.template_defaults)
    }

    fn extract_outputs(&self, response: &HttpResponse) -> Result<Outputs, NodeError> {
        if self.output_map.is_empty() {
            return Ok(Outputs::new());
        }

        let body = response.parse_body().map_err(|e| NodeError::Extraction {
            key: "<body>".to_string(),
            reason: format!("response is not valid JSON: {}", e),
        })?;

        self.output_map
            .iter()
            .map(|(key, spec)| -> Result<(String, Value), NodeError> {
                Ok((key.clone(), spec.evaluate(key, &body)?))
            })
            .collect()
    }

    /// One request, holding a throttle permit only while it is in flight
    async fn attempt(&self, url: &str) -> Result<HttpResponse, String> {
        let _permit = self
            .throttle
            .acquire()
            .await
            .map_err(|_| "request throttle closed".to_string())?;
        self.client
            .send(self.method, url)
            .await
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl Node for HttpCallNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn node_type(&self) -> &str {
        "http.call"
    }

    async fn process(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let url = self.resolve_url(&ctx.inputs)?;
        ctx.events.info(format!("{} {}", self.method, url));

        let mut attempt = 1;
        loop {
            let started_at = Utc::now();
            let clock = Instant::now();
            let outcome = self.attempt(&url).await;

            let (status, error) = match &outcome {
                Ok(response) if response.is_success() => (Some(response.status), None),
                Ok(response) => (
                    Some(response.status),
                    Some(format!("unexpected status {}", response.status)),
                ),
                Err(e) => (None, Some(e.clone())),
            };
            tracing::debug!(node = %self.id, attempt, ?status, ?error, "HTTP attempt finished");
            ctx.events.attempt(attempt, status, error.clone());
            ctx.attempts
                .record(AttemptRecord {
                    attempt,
                    started_at,
                    duration_ms: clock.elapsed().as_millis() as u64,
                    status,
                    error: error.clone(),
                })
                .await;

            let last_error = match outcome {
                Ok(response) if response.is_success() => {
                    return self.extract_outputs(&response).map(NodeOutput::from_outputs);
                }
                Ok(response) => match self.error_handlers.get(&response.status) {
                    Some(handler) => {
                        ctx.events
                            .info(format!("Status {} handled without retry", response.status));
                        return Ok(NodeOutput::from_outputs(handler(&ctx.inputs)).with_resolution(
                            OutputResolution::ErrorHandler {
                                status: response.status,
                            },
                        ));
                    }
                    None => error.unwrap_or_default(),
                },
                Err(e) => e,
            };

            if attempt <= self.retry.retry_count {
                let delay = self.retry.delay_for(attempt);
                tracing::warn!(
                    "Node {} attempt {}/{} failed: {}. Retrying in {}ms",
                    self.id,
                    attempt,
                    self.retry.retry_count + 1,
                    last_error,
                    delay.as_millis()
                );
                ctx.events.warn(format!("Attempt {} failed: {}", attempt, last_error));
                tokio::select! {
                    _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
                    _ = sleep(delay) => {}
                }
                attempt += 1;
                continue;
            }

            return match &self.default_outputs {
                Some(defaults) => Ok(NodeOutput::from_outputs(defaults.clone())
                    .with_resolution(OutputResolution::DefaultOutputs { last_error })),
                None => Err(NodeError::RequestFailed {
                    attempts: attempt,
                    last_error,
                }),
            };
        }
    }
}

pub struct HttpCallNodeBuilder {
    id: NodeId,
    url_template: String,
    method: HttpMethod,
    paths: Vec<(String, String)>,
    functions: Vec<(String, BodyFn)>,
    error_handlers: HashMap<u16, StatusHandler>,
    default_outputs: Option<Outputs>,
    template_defaults: Outputs,
    retry: RetryPolicy,
    max_concurrent_requests: usize,
    client: Option<Arc<dyn HttpClient>>,
}

impl HttpCallNodeBuilder {
    pub fn new(id: impl Into<NodeId>, url_template: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url_template: url_template.into(),
            method: HttpMethod::Get,
            paths: Vec::new(),
            functions: Vec::new(),
            error_handlers: HashMap::new(),
            default_outputs: None,
            template_defaults: Outputs::new(),
            retry: RetryPolicy::none(),
            max_concurrent_requests: 5,
            client: None,
        }
    }

    pub fn method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    /// Output `key` is the value at `path` in the response body
    pub fn output_path(mut self, key: impl Into<String>, path: impl Into<String>) -> Self {
        self.paths.push((key.into(), path.into()));
        self
    }

    /// Output `key` is computed from the whole response body
    pub fn output_fn<F>(mut self, key: impl Into<String>, function: F) -> Self
    where
        F: Fn(&serde_json::Value) -> Value + Send + Sync + 'static,
    {
        self.functions.push((key.into(), Arc::new(function)));
        self
    }

    /// Terminal outputs for `status`; that status is never retried
    pub fn on_status<F>(mut self, status: u16, handler: F) -> Self
    where
        F: Fn(&NodeInputs) -> Outputs + Send + Sync + 'static,
    {
        self.error_handlers.insert(status, Arc::new(handler));
        self
    }

    pub fn default_outputs(mut self, outputs: Outputs) -> Self {
        self.default_outputs = Some(outputs);
        self
    }

    /// Fallback for a placeholder missing from the inputs
    pub fn template_default(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.template_defaults.insert(name.into(), value.into());
        self
    }

    pub fn retry(mut self, retry_count: u32, retry_delay: Duration) -> Self {
        self.retry.retry_count = retry_count;
        self.retry.retry_delay = retry_delay;
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.retry.backoff_multiplier = multiplier;
        self
    }

    pub fn max_concurrent_requests(mut self, limit: usize) -> Self {
        self.max_concurrent_requests = limit;
        self
    }

    pub fn client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn build(self) -> Result<HttpCallNode, NodeError> {
        let url = UrlTemplate::parse(&self.url_template)?;

        if self.max_concurrent_requests == 0 {
            return Err(NodeError::Configuration(
                "max_concurrent_requests must be at least 1".to_string(),
            ));
        }
        if !self.retry.backoff_multiplier.is_finite() || self.retry.backoff_multiplier <= 0.0 {
            return Err(NodeError::Configuration(format!(
                "backoff_multiplier must be positive, got {}",
                self.retry.backoff_multiplier
            )));
        }

        let mut output_map = BTreeMap::new();
        let specs = self
            .paths
            .into_iter()
            .map(|(key, path)| {
                JsonPath::parse(&path)
                    .map(|path| (key.clone(), OutputSpec::Path(path)))
                    .map_err(|e| NodeError::Configuration(format!("output '{}': {}", key, e)))
            })
            .chain(
                self.functions
                    .into_iter()
                    .map(|(key, function)| Ok((key, OutputSpec::Function(function)))),
            );
        for spec in specs {
            let (key, spec) = spec?;
            if output_map.contains_key(&key) {
                return Err(NodeError::Configuration(format!(
                    "output '{}' is defined more than once",
                    key
                )));
            }
            output_map.insert(key, spec);
        }

        let client = match self.client {
            Some(client) => client,
            None => Arc::new(ReqwestClient::new()),
        };

        Ok(HttpCallNode {
            id: self.id,
            url,
            method: self.method,
            output_map,
            error_handlers: self.error_handlers,
            default_outputs: self.default_outputs,
            template_defaults: self.template_defaults,
            retry: self.retry,
            throttle: Semaphore::new(self.max_concurrent_requests),
            max_concurrent_requests: self.max_concurrent_requests,
            client,
        })
    }
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_backoff() -> f64 {
    1.0
}

fn default_max_concurrent() -> usize {
    5
}

/// `http.call` node configuration as it appears in graph definitions
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct HttpCallConfig {
    url_template: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    output_map: BTreeMap<String, String>,
    #[serde(default)]
    error_handlers: BTreeMap<u16, BTreeMap<String, serde_json::Value>>,
    #[serde(default)]
    default_outputs: Option<BTreeMap<String, serde_json::Value>>,
    #[serde(default)]
    template_defaults: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    retry_count: u32,
    #[serde(default = "default_retry_delay_ms")]
    retry_delay_ms: u64,
    #[serde(default = "default_backoff")]
    backoff_multiplier: f64,
    #[serde(default = "default_max_concurrent")]
    max_concurrent_requests: usize,
}

fn to_outputs(map: BTreeMap<String, serde_json::Value>) -> Outputs {
    map.into_iter().map(|(k, v)| (k, Value::from(v))).collect()
}

/// Builds `http.call` nodes; every node gets its own throttle but shares
/// the factory's transport
pub struct HttpCallNodeFactory {
    client: Arc<dyn HttpClient>,
}

impl HttpCallNodeFactory {
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self { client }
    }
}

impl Default for HttpCallNodeFactory {
    fn default() -> Self {
        Self::new(Arc::new(ReqwestClient::new()))
    }
}

impl NodeFactory for HttpCallNodeFactory {
    fn create(&self, id: &str, config: &serde_json::Value) -> Result<Box<dyn Node>, NodeError> {
        let config: HttpCallConfig = serde_json::from_value(config.clone())
            .map_err(|e| NodeError::Configuration(format!("http.call config: {}", e)))?;

        let mut builder = HttpCallNode::builder(id, config.url_template)
            .method(config.method.parse()?)
            .retry(config.retry_count, Duration::from_millis(config.retry_delay_ms))
            .backoff_multiplier(config.backoff_multiplier)
            .max_concurrent_requests(config.max_concurrent_requests)
            .client(self.client.clone());

        for (key, path) in config.output_map {
            builder = builder.output_path(key, path);
        }
        for (status, outputs) in config.error_handlers {
            let outputs = to_outputs(outputs);
            builder = builder.on_status(status, move |_| outputs.clone());
        }
        if let Some(defaults) = config.default_outputs {
            builder = builder.default_outputs(to_outputs(defaults));
        }
        for (name, value) in config.template_defaults {
            builder = builder.template_default(name, value);
        }

        Ok(Box::new(builder.build()?))
    }

    fn node_type(&self) -> &str {
        "http.call"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Call a remote API and extract outputs from its JSON response"
                .to_string(),
            category: "http".to_string(),
            config: vec![
                ConfigField::required("url_template", "URL with ${name} placeholders"),
                ConfigField::optional("method", "HTTP verb (default GET)"),
                ConfigField::optional("output_map", "output key -> path expression"),
                ConfigField::optional("error_handlers", "status -> substitute outputs"),
                ConfigField::optional("default_outputs", "outputs once retries run out"),
                ConfigField::optional("template_defaults", "fallback placeholder values"),
                ConfigField::optional("retry_count", "attempts after the first (default 0)"),
                ConfigField::optional("retry_delay_ms", "delay between attempts (default 1000)"),
                ConfigField::optional("backoff_multiplier", "delay growth per retry (default 1)"),
                ConfigField::optional(
                    "max_concurrent_requests",
                    "in-flight request limit for this node (default 5)",
                ),
            ],
        }
    }
}
