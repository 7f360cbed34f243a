//! Outbound calls to workers and owners.
//!
//! Everything the coordinator says to another node goes through
//! [`NodeTransport`], so the scheduling engine can be driven by an in-memory
//! implementation in tests.

use async_trait::async_trait;

use fanout_core::{ComputeRequest, Node, PartialResult, TransportConfig, WorkerActivity};

/// Errors that can occur talking to a node.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("node returned {status}: {body}")]
    Status { status: u16, body: String },
}

#[async_trait]
pub trait NodeTransport: Send + Sync {
    /// Hand a window to a worker. `target` is the worker's public base URL.
    async fn dispatch(&self, target: &str, request: &ComputeRequest) -> Result<(), TransportError>;

    /// Relay one partial result to its owner.
    async fn forward_partial(&self, owner: &Node, data: &serde_json::Value) -> Result<(), TransportError>;

    async fn notify_done(&self, owner: &Node) -> Result<(), TransportError>;

    async fn notify_error(&self, owner: &Node, reason: &str) -> Result<(), TransportError>;

    /// Liveness probe; any response counts as healthy.
    async fn probe(&self, node: &Node) -> Result<(), TransportError>;

    /// Ask a worker what it is doing.
    async fn check_status(&self, target: &str) -> Result<WorkerActivity, TransportError>;
}

/// [`NodeTransport`] over HTTP/JSON using the node API paths.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    /// Shared HTTP client (connection pooling).
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(config.timeout()).build()?;
        Ok(Self { client })
    }

    /// Turn a non-2xx response into [`TransportError::Status`].
    async fn check(url: &str, response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        tracing::debug!(url = %url, %status, body = %body, "node returned non-2xx status");
        Err(TransportError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl NodeTransport for HttpTransport {
    async fn dispatch(&self, target: &str, request: &ComputeRequest) -> Result<(), TransportError> {
        let url = format!("{target}/api/v1/addTask");
        let response = self.client.post(&url).json(request).send().await?;
        Self::check(&url, response).await?;
        Ok(())
    }

    async fn forward_partial(&self, owner: &Node, data: &serde_json::Value) -> Result<(), TransportError> {
        let url = format!("{}/api/v1/subtask/done", owner.public_base());
        let body = PartialResult { data: data.clone() };
        let response = self.client.post(&url).json(&body).send().await?;
        Self::check(&url, response).await?;
        Ok(())
    }

    async fn notify_done(&self, owner: &Node) -> Result<(), TransportError> {
        let url = format!("{}/api/v1/task/done", owner.public_base());
        let response = self.client.get(&url).send().await?;
        Self::check(&url, response).await?;
        Ok(())
    }

    async fn notify_error(&self, owner: &Node, reason: &str) -> Result<(), TransportError> {
        let url = format!("{}/api/v1/task/error", owner.public_base());
        let response = self.client.post(&url).json(&reason).send().await?;
        Self::check(&url, response).await?;
        Ok(())
    }

    async fn probe(&self, node: &Node) -> Result<(), TransportError> {
        self.client.get(node.health_url()).send().await?;
        Ok(())
    }

    async fn check_status(&self, target: &str) -> Result<WorkerActivity, TransportError> {
        let url = format!("{target}/api/v1/checkStatus");
        let response = self.client.get(&url).send().await?;
        let response = Self::check(&url, response).await?;
        Ok(response.json::<WorkerActivity>().await?)
    }
}
