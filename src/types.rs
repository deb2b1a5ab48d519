//! Core data types shared across the gateway
//!
//! # Key Types
//!
//! - **`DataPoint`**: A single `(timestamp, value)` sample returned by the backend
//! - **`QueryWindow`**: Absolute time window of a query, in seconds
//! - **`QueryStatus`**: Per-series outcome of a backend sub-query
//!
//! # Example
//!
//! ```rust
//! use tsdb_gateway::types::{QueryStatus, StatusKind};
//!
//! let status = QueryStatus::warning("query successful, no data");
//! assert_eq!(status.status, StatusKind::Warning);
//! assert!(!status.is_error());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single sample of a time series
///
/// Timestamps are Unix seconds (milliseconds when the backend is queried
/// with millisecond resolution).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Sample timestamp
    pub timestamp: i64,

    /// Sample value; NaN means unknown
    pub value: f64,
}

impl DataPoint {
    /// Create a new data point
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Absolute time window of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryWindow {
    /// Start timestamp (inclusive)
    pub start: i64,

    /// End timestamp (inclusive); `None` means "now"
    pub end: Option<i64>,
}

impl QueryWindow {
    /// Create a window with an explicit end
    pub fn new(start: i64, end: i64) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    /// Create a window that runs until now
    pub fn since(start: i64) -> Self {
        Self { start, end: None }
    }
}

/// Outcome category of a sub-query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusKind {
    /// Data returned
    Success,
    /// Query ran but the answer is degraded (no data, unparseable body)
    Warning,
    /// Query failed
    Error,
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusKind::Success => write!(f, "SUCCESS"),
            StatusKind::Warning => write!(f, "WARNING"),
            StatusKind::Error => write!(f, "ERROR"),
        }
    }
}

/// Status of one backend sub-query, surfaced per series
///
/// Lets callers distinguish "no data" from "query failed" from "value
/// absent in this bucket".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryStatus {
    /// Outcome category
    pub status: StatusKind,

    /// Human-readable detail
    pub message: String,
}

impl QueryStatus {
    /// Successful query
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: StatusKind::Success,
            message: message.into(),
        }
    }

    /// Degraded query
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            status: StatusKind::Warning,
            message: message.into(),
        }
    }

    /// Failed query
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: StatusKind::Error,
            message: message.into(),
        }
    }

    /// Whether the sub-query failed
    pub fn is_error(&self) -> bool {
        self.status == StatusKind::Error
    }
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}
