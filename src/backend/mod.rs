//! Backend store access
//!
//! The gateway talks to an OpenTSDB-style store over JSON/HTTP. The
//! [`Transport`] trait is the seam between the fan-out executor and the
//! network: [`HttpTransport`] is the production implementation, tests plug
//! in in-memory transports returning canned responses.
//!
//! - [`wire`]: request/response JSON model and name escaping
//! - [`http`]: reqwest-based transport with bounded connections

pub mod http;
pub mod wire;

use async_trait::async_trait;

use crate::error::TransportError;

pub use http::HttpTransport;

/// Query endpoint
pub const QUERY_PATH: &str = "/api/query";
/// Name suggestion endpoint
pub const SUGGEST_PATH: &str = "/api/suggest";
/// UID rename endpoint
pub const RENAME_PATH: &str = "/api/uid/rename";
/// Cache flush endpoint
pub const DROP_CACHES_PATH: &str = "/api/dropcaches";

/// Status and body of a backend answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body as text
    pub body: String,
}

impl RawResponse {
    /// Create a response
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// 2xx status
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 4xx status
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }
}

/// Request/response channel to the backend
///
/// Implementations are shared read-only across all fan-out tasks.
#[async_trait]
pub trait Transport: Send + Sync {
    /// POST a JSON body to `path`
    async fn post_json(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<RawResponse, TransportError>;

    /// GET `path` with query parameters
    async fn get(
        &self,
        path: &str,
        params: &[(String, String)],
    ) -> Result<RawResponse, TransportError>;
}
