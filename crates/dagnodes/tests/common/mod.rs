// crates/dagnodes/tests/common/mod.rs
#![allow(dead_code)]

use async_trait::async_trait;
use dagcore::{EventEmitter, NodeContext, NodeInputs};
use dagnodes::{HttpClient, HttpMethod, HttpResponse, TransportError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_test_writer()
        .try_init();
}

type Reply = Result<HttpResponse, TransportError>;

/// Replays scripted replies in order, then repeats the fallback forever
pub struct ScriptedClient {
    script: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    latency: Duration,
    requests: Mutex<Vec<(HttpMethod, String)>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedClient {
    pub fn always(reply: Reply) -> Self {
        Self::sequence(Vec::new(), reply)
    }

    pub fn sequence(script: Vec<Reply>, fallback: Reply) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            latency: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn json(status: u16, body: serde_json::Value) -> Self {
        Self::always(Ok(HttpResponse::json(status, &body)))
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn urls(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(_, url)| url.clone())
            .collect()
    }

    pub fn methods(&self) -> Vec<HttpMethod> {
        self.requests.lock().unwrap().iter().map(|(m, _)| *m).collect()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Highest number of requests seen in flight at once
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpClient for ScriptedClient {
    async fn send(&self, method: HttpMethod, url: &str) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push((method, url.to_string()));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| self.fallback.clone())
    }
}

pub fn context(node_id: &str, inputs: NodeInputs) -> NodeContext {
    NodeContext::new(node_id, inputs, EventEmitter::detached(node_id))
}
