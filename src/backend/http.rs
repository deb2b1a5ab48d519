//! reqwest-backed [`Transport`]
//!
//! One `reqwest::Client` is built per transport and shared by every task.
//! The client's idle pool bounds connections per host; a semaphore bounds
//! the total number of requests in flight. The two limits are configured
//! separately from the worker pool.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use super::{RawResponse, Transport};
use crate::config::BackendConfig;
use crate::error::{Error, Result, TransportError};

/// HTTP transport to the backend store
#[derive(Debug, Clone)]
pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
    connections: Arc<Semaphore>,
}

impl HttpTransport {
    /// Build a transport from backend settings
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.socket_timeout_ms))
            .pool_max_idle_per_host(config.max_connections_per_route)
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            base_url = %config.base_url,
            max_connections = config.max_connections_total,
            max_per_route = config.max_connections_per_route,
            "HTTP transport created"
        );

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
            connections: Arc::new(Semaphore::new(config.max_connections_total.max(1))),
        })
    }

    /// Base URL requests are issued against
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> std::result::Result<RawResponse, TransportError> {
        let _permit = self
            .connections
            .acquire()
            .await
            .map_err(|_| TransportError::Request("connection pool closed".to_string()))?;

        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Body(e.to_string()))?;

        debug!(status, bytes = body.len(), "Backend response");
        Ok(RawResponse { status, body })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else if e.is_body() || e.is_decode() {
        TransportError::Body(e.to_string())
    } else {
        TransportError::Request(e.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_json(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> std::result::Result<RawResponse, TransportError> {
        self.send(self.client.post(self.url(path)).json(&body)).await
    }

    async fn get(
        &self,
        path: &str,
        params: &[(String, String)],
    ) -> std::result::Result<RawResponse, TransportError> {
        self.send(self.client.get(self.url(path)).query(params)).await
    }
}
