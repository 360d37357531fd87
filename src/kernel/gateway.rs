//! Jupyter Kernel Gateway REST client
//!
//! The gateway inside the container exposes:
//!
//! ```text
//! GET  /api                                 readiness (200 once up)
//! POST /api/kernels                         start a kernel → {"id": ...}
//! WS   /api/kernels/{id}/channels           message channel
//! ```
//!
//! [`GatewayClient`] uses async reqwest, [`BlockingGatewayClient`] the
//! blocking one. The blocking client must not be used from inside a tokio
//! runtime.

use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::deadline::Deadline;

/// Delay between readiness checks
pub const READY_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Per-request HTTP timeout
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Error type for gateway operations
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("gateway returned {status} for {url}")]
    Status { status: u16, url: String },

    #[error("gateway did not become ready within {0:?}")]
    NotReady(Duration),

    #[error("invalid gateway URL: {0}")]
    InvalidUrl(String),
}

/// Host and port a gateway listens on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayEndpoint {
    pub host: String,
    pub port: u16,
}

impl GatewayEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Gateway on `localhost:port`
    pub fn localhost(port: u16) -> Self {
        Self::new("localhost", port)
    }

    /// `http://host:port/api`
    pub fn api_url(&self) -> String {
        format!("http://{}:{}/api", self.host, self.port)
    }

    pub fn kernels_url(&self) -> String {
        format!("{}/kernels", self.api_url())
    }

    /// WebSocket channel URL for a kernel
    pub fn channels_url(&self, kernel_id: &str) -> Result<Url, GatewayError> {
        let raw = format!(
            "ws://{}:{}/api/kernels/{}/channels",
            self.host, self.port, kernel_id
        );
        Url::parse(&raw).map_err(|e| GatewayError::InvalidUrl(format!("{raw}: {e}")))
    }
}

/// Kernel model returned by `POST /api/kernels`
#[derive(Debug, Clone, Deserialize)]
pub struct KernelInfo {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

fn check_status(status: reqwest::StatusCode, url: &str) -> Result<(), GatewayError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(GatewayError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        })
    }
}

/// Async gateway client
#[derive(Clone)]
pub struct GatewayClient {
    endpoint: GatewayEndpoint,
    client: reqwest::Client,
}

impl GatewayClient {
    pub fn new(endpoint: GatewayEndpoint) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self { endpoint, client })
    }

    pub fn endpoint(&self) -> &GatewayEndpoint {
        &self.endpoint
    }

    /// Whether `GET /api` answers 200
    pub async fn is_ready(&self) -> bool {
        match self.client.get(self.endpoint.api_url()).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    /// Poll readiness until it succeeds or `timeout` runs out
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<(), GatewayError> {
        let deadline = Deadline::after(timeout);
        loop {
            if self.is_ready().await {
                debug!(port = self.endpoint.port, "kernel gateway ready");
                return Ok(());
            }
            if deadline.is_expired() {
                return Err(GatewayError::NotReady(timeout));
            }
            debug!(port = self.endpoint.port, "waiting for kernel gateway");
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    /// Start a kernel and return its id
    pub async fn create_kernel(&self) -> Result<String, GatewayError> {
        let url = self.endpoint.kernels_url();
        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .body("{}")
            .send()
            .await?;
        check_status(response.status(), &url)?;
        let kernel: KernelInfo = response.json().await?;
        debug!(kernel_id = %kernel.id, "kernel created");
        Ok(kernel.id)
    }
}

/// Blocking gateway client
#[derive(Clone)]
pub struct BlockingGatewayClient {
    endpoint: GatewayEndpoint,
    client: reqwest::blocking::Client,
}

impl BlockingGatewayClient {
    pub fn new(endpoint: GatewayEndpoint) -> Result<Self, GatewayError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()?;
        Ok(Self { endpoint, client })
    }

    pub fn endpoint(&self) -> &GatewayEndpoint {
        &self.endpoint
    }

    pub fn is_ready(&self) -> bool {
        match self.client.get(self.endpoint.api_url()).send() {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    pub fn wait_until_ready(&self, timeout: Duration) -> Result<(), GatewayError> {
        let deadline = Deadline::after(timeout);
        loop {
            if self.is_ready() {
                debug!(port = self.endpoint.port, "kernel gateway ready");
                return Ok(());
            }
            if deadline.is_expired() {
                return Err(GatewayError::NotReady(timeout));
            }
            debug!(port = self.endpoint.port, "waiting for kernel gateway");
            std::thread::sleep(READY_POLL_INTERVAL);
        }
    }

    pub fn create_kernel(&self) -> Result<String, GatewayError> {
        let url = self.endpoint.kernels_url();
        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .body("{}")
            .send()?;
        check_status(response.status(), &url)?;
        let kernel: KernelInfo = response.json()?;
        debug!(kernel_id = %kernel.id, "kernel created");
        Ok(kernel.id)
    }
}
