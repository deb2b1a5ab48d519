//! Configuration management for the gateway
//!
//! TOML configuration with per-field defaults, environment variable
//! overrides and validation. The core only consumes these values; loading
//! them is the binary's job.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GatewayConfig {
    /// Backend store connection settings
    #[serde(default)]
    pub backend: BackendConfig,

    /// Fan-out worker pool sizing
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Administrative operation retries
    #[serde(default)]
    pub admin: AdminConfig,

    /// Query processing defaults
    #[serde(default)]
    pub query: QueryConfig,

    /// Logging
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Backend store configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Base URL of the backend HTTP API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// TCP connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Whole-request (socket) timeout in milliseconds
    #[serde(default = "default_socket_timeout_ms")]
    pub socket_timeout_ms: u64,

    /// Maximum concurrent connections across all routes
    #[serde(default = "default_max_connections_total")]
    pub max_connections_total: usize,

    /// Maximum idle connections kept per route
    #[serde(default = "default_max_connections_per_route")]
    pub max_connections_per_route: usize,

    /// Send tag patterns as `filters` instead of `tags`
    #[serde(default)]
    pub use_filters: bool,

    /// Ask the backend for millisecond resolution
    #[serde(default)]
    pub ms_resolution: bool,
}

/// Fan-out worker pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutorConfig {
    /// Number of worker threads kept alive
    #[serde(default = "default_core_pool_size")]
    pub core_pool_size: usize,

    /// Upper bound on concurrent backend sub-queries
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: usize,
}

/// Administrative operation configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdminConfig {
    /// Attempts per rename/suggest call
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Attempts per drop-cache call
    #[serde(default = "default_retry_count")]
    pub drop_cache_retry_count: u32,

    /// Base delay between attempts in milliseconds
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

/// Query processing configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueryConfig {
    /// Default bucket width in seconds
    #[serde(default = "default_bucket_size_secs")]
    pub bucket_size_secs: i64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// Default value functions
fn default_base_url() -> String { "http://localhost:4242".to_string() }
fn default_connect_timeout_ms() -> u64 { 5_000 }
fn default_socket_timeout_ms() -> u64 { 30_000 }
fn default_max_connections_total() -> usize { 64 }
fn default_max_connections_per_route() -> usize { 16 }
fn default_core_pool_size() -> usize { 4 }
fn default_max_pool_size() -> usize { 16 }
fn default_retry_count() -> u32 { 2 }
fn default_retry_backoff_ms() -> u64 { 100 }
fn default_bucket_size_secs() -> i64 { 60 }
fn default_log_level() -> String { "info".to_string() }

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            connect_timeout_ms: default_connect_timeout_ms(),
            socket_timeout_ms: default_socket_timeout_ms(),
            max_connections_total: default_max_connections_total(),
            max_connections_per_route: default_max_connections_per_route(),
            use_filters: false,
            ms_resolution: false,
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            core_pool_size: default_core_pool_size(),
            max_pool_size: default_max_pool_size(),
        }
    }
}

impl ExecutorConfig {
    /// Effective `(core, max)` pool sizes
    ///
    /// A core size above the max size is a misconfiguration; the max is
    /// raised to the core size rather than failing.
    pub fn effective_sizes(&self) -> (usize, usize) {
        let core = self.core_pool_size.max(1);
        let max = self.max_pool_size.max(1);
        if core > max {
            warn!(
                core_pool_size = core,
                max_pool_size = max,
                "Core pool size exceeds max pool size, using core size for both"
            );
            (core, core)
        } else {
            (core, max)
        }
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            retry_count: default_retry_count(),
            drop_cache_retry_count: default_retry_count(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            bucket_size_secs: default_bucket_size_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read config file {}: {}", path, e))
        })?;

        toml::from_str(&contents).map_err(|e| {
            Error::Configuration(format!("Failed to parse config file {}: {}", path, e))
        })
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: &str) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        // Backend
        if let Ok(url) = std::env::var("GATEWAY_BACKEND_URL") {
            self.backend.base_url = url;
        }

        // Executor
        if let Ok(core) = std::env::var("GATEWAY_CORE_POOL_SIZE") {
            if let Ok(n) = core.parse() {
                self.executor.core_pool_size = n;
            }
        }
        if let Ok(max) = std::env::var("GATEWAY_MAX_POOL_SIZE") {
            if let Ok(n) = max.parse() {
                self.executor.max_pool_size = n;
            }
        }

        // Query
        if let Ok(size) = std::env::var("GATEWAY_BUCKET_SIZE") {
            if let Ok(n) = size.parse() {
                self.query.bucket_size_secs = n;
            }
        }

        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.logging.log_level = log_level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.backend.base_url.trim().is_empty() {
            return Err(Error::Configuration("Backend base URL cannot be empty".into()));
        }
        if !self.backend.base_url.starts_with("http://")
            && !self.backend.base_url.starts_with("https://")
        {
            return Err(Error::Configuration(format!(
                "Backend base URL must be http(s): {}",
                self.backend.base_url
            )));
        }

        if self.backend.max_connections_total == 0 || self.backend.max_connections_per_route == 0
        {
            return Err(Error::Configuration("Connection pool sizes must be > 0".into()));
        }
        if self.backend.max_connections_per_route > self.backend.max_connections_total {
            return Err(Error::Configuration(
                "Max connections per route cannot exceed max connections total".into(),
            ));
        }

        if self.executor.core_pool_size == 0 || self.executor.max_pool_size == 0 {
            return Err(Error::Configuration("Worker pool sizes must be > 0".into()));
        }

        if self.admin.retry_count == 0 || self.admin.drop_cache_retry_count == 0 {
            return Err(Error::Configuration("Retry counts must be >= 1".into()));
        }

        if self.query.bucket_size_secs <= 0 {
            return Err(Error::Configuration("Bucket size must be > 0".into()));
        }

        Ok(())
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: &str) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, contents).map_err(|e| {
            Error::Configuration(format!("Failed to write config file {}: {}", path, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.backend.base_url, "http://localhost:4242");
        assert_eq!(config.admin.retry_count, 2);
        assert_eq!(config.query.bucket_size_secs, 60);
    }

    #[test]
    fn test_config_validation() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_bucket_size() {
        let mut config = GatewayConfig::default();
        config.query.bucket_size_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_per_route_above_total_rejected() {
        let mut config = GatewayConfig::default();
        config.backend.max_connections_per_route = 100;
        config.backend.max_connections_total = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_core_above_max_falls_back() {
        let config = ExecutorConfig {
            core_pool_size: 8,
            max_pool_size: 2,
        };
        assert_eq!(config.effective_sizes(), (8, 8));

        let config = ExecutorConfig {
            core_pool_size: 2,
            max_pool_size: 8,
        };
        assert_eq!(config.effective_sizes(), (2, 8));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [backend]
            base_url = "http://tsdb:4242"

            [executor]
            max_pool_size = 32
            "#,
        )
        .unwrap();
        assert_eq!(config.backend.base_url, "http://tsdb:4242");
        assert_eq!(config.backend.socket_timeout_ms, 30_000);
        assert_eq!(config.executor.core_pool_size, 4);
        assert_eq!(config.executor.max_pool_size, 32);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        let path = path.to_str().unwrap();

        let mut config = GatewayConfig::default();
        config.query.bucket_size_secs = 10;
        config.save_to_file(path).unwrap();

        let loaded = GatewayConfig::from_file(path).unwrap();
        assert_eq!(loaded.query.bucket_size_secs, 10);
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("GATEWAY_MAX_POOL_SIZE", "48");
        let config = GatewayConfig::from_env();
        assert_eq!(config.executor.max_pool_size, 48);
        std::env::remove_var("GATEWAY_MAX_POOL_SIZE");
    }
}
