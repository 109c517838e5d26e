//! Configuration management for Redline services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Relational database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Backend selection and blob storage
    #[serde(default)]
    pub storage: StorageConfig,

    /// Processing queue configuration
    #[serde(default)]
    pub queue: QueueConfig,

    /// AI comparison service configuration
    #[serde(default)]
    pub comparison: ComparisonConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL (writes and state-machine reads)
    pub url: Option<String>,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

/// Which repository backend to run on
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Relational if reachable and writable, otherwise in-memory
    Auto,
    /// Relational only; startup fails if unavailable
    Relational,
    /// In-process store; single instance only
    Memory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: BackendKind,

    /// Root directory for the local blob store
    #[serde(default = "default_blob_dir")]
    pub blob_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// Claims allowed before an item is failed permanently
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,

    /// Maximum items drained per poll
    #[serde(default = "default_queue_batch_size")]
    pub batch_size: usize,

    /// Sleep between polls when the queue is empty, in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Priority given to newly uploaded documents
    #[serde(default)]
    pub default_priority: i32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ComparisonConfig {
    /// Comparison endpoint base URL
    #[serde(default = "default_comparison_base")]
    pub api_base: String,

    /// API key for the comparison service
    pub api_key: Option<String>,

    /// Model to request
    #[serde(default = "default_comparison_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_comparison_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries
    #[serde(default = "default_comparison_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_backend() -> BackendKind { BackendKind::Auto }
fn default_blob_dir() -> PathBuf { PathBuf::from("data/blobs") }
fn default_max_attempts() -> i32 { 3 }
fn default_queue_batch_size() -> usize { 10 }
fn default_poll_interval() -> u64 { 2000 }
fn default_comparison_base() -> String { "http://localhost:8090/v1".to_string() }
fn default_comparison_model() -> String { "redline-compare-1".to_string() }
fn default_comparison_timeout() -> u64 { 60 }
fn default_comparison_retries() -> u32 { 2 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "redline".to_string() }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            read_url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            blob_dir: default_blob_dir(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            batch_size: default_queue_batch_size(),
            poll_interval_ms: default_poll_interval(),
            default_priority: 0,
        }
    }
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            api_base: default_comparison_base(),
            api_key: None,
            model: default_comparison_model(),
            timeout_secs: default_comparison_timeout(),
            max_retries: default_comparison_retries(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            storage: StorageConfig::default(),
            queue: QueueConfig::default(),
            comparison: ComparisonConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__QUEUE__MAX_ATTEMPTS=5
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get the idle poll interval as Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.queue.poll_interval_ms)
    }

    /// Get the comparison request timeout as Duration
    pub fn comparison_timeout(&self) -> Duration {
        Duration::from_secs(self.comparison.timeout_secs)
    }

    /// Get the read database URL (falls back to primary)
    pub fn read_database_url(&self) -> Option<&str> {
        self.database
            .read_url
            .as_deref()
            .or(self.database.url.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.storage.backend, BackendKind::Auto);
        assert_eq!(config.queue.max_attempts, 3);
        assert_eq!(config.poll_interval(), Duration::from_secs(2));
    }

    #[test]
    fn test_read_database_fallback() {
        let mut config = AppConfig::default();
        assert_eq!(config.read_database_url(), None);

        config.database.url = Some("postgres://localhost/redline".to_string());
        assert_eq!(config.read_database_url(), Some("postgres://localhost/redline"));

        config.database.read_url = Some("postgres://replica/redline".to_string());
        assert_eq!(config.read_database_url(), Some("postgres://replica/redline"));
    }

    #[test]
    fn test_backend_kind_from_str() {
        let kind: BackendKind = serde_json::from_str("\"memory\"").unwrap();
        assert_eq!(kind, BackendKind::Memory);
    }
}
