//! Database layer for Redline
//!
//! Provides:
//! - SeaORM entity models and their row codecs
//! - A generic repository that runs on either backend
//! - Backend selection (relational or in-process) made once at startup
//! - Connection pool management and schema bootstrap

pub mod models;
pub mod codec;
pub mod filter;
pub mod memory;
pub mod schema;
mod repository;
pub mod documents;
pub mod comparisons;
pub mod exports;

pub use codec::{Metadata, RowCodec, Stored};
pub use comparisons::{Comparison, ComparisonRepository, ComparisonStatus, NewComparison};
pub use documents::{Document, DocumentRepository, DocumentStatus, NewDocument};
pub use exports::{Export, ExportRepository, ExportType, NewExport};
pub use filter::{FieldValue, Filter};
pub use memory::MemoryStore;
pub use repository::Repository;

use crate::config::{AppConfig, BackendKind, DatabaseConfig};
use crate::errors::{AppError, Result};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Database connection pool wrapper
#[derive(Clone)]
pub struct DbPool {
    /// Primary connection (writes and state-machine reads)
    pub primary: DatabaseConnection,

    /// Read replica connection (optional)
    pub replica: Option<DatabaseConnection>,
}

impl DbPool {
    /// Create a new database pool from configuration
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let url = config.url.as_deref().ok_or_else(|| AppError::BackendUnavailable {
            message: "database.url is not configured".to_string(),
        })?;

        info!("Connecting to primary database...");
        let primary = connect(url, config).await.map_err(|e| AppError::BackendUnavailable {
            message: format!("Failed to connect to primary: {}", e),
        })?;

        // Connect to replica if configured
        let replica = if let Some(ref read_url) = config.read_url {
            info!("Connecting to read replica...");
            let replica_conn = connect(read_url, config).await.map_err(|e| AppError::BackendUnavailable {
                message: format!("Failed to connect to replica: {}", e),
            })?;
            Some(replica_conn)
        } else {
            None
        };

        info!("Database connections established");

        Ok(Self { primary, replica })
    }

    /// Get the connection for plain lookups (replica if available, otherwise primary)
    pub fn read(&self) -> &DatabaseConnection {
        self.replica.as_ref().unwrap_or(&self.primary)
    }

    /// Get the connection for writes (always primary)
    pub fn write(&self) -> &DatabaseConnection {
        &self.primary
    }

    /// Ping the database to check connectivity
    pub async fn ping(&self) -> Result<()> {
        self.primary.ping().await.map_err(|e| AppError::BackendUnavailable {
            message: format!("Primary ping failed: {}", e),
        })?;

        if let Some(ref replica) = self.replica {
            replica.ping().await.map_err(|e| AppError::BackendUnavailable {
                message: format!("Replica ping failed: {}", e),
            })?;
        }

        Ok(())
    }
}

async fn connect(url: &str, config: &DatabaseConfig) -> std::result::Result<DatabaseConnection, sea_orm::DbErr> {
    let mut opts = ConnectOptions::new(url);
    opts.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .sqlx_logging(false);

    Database::connect(opts).await
}

/// Storage backend, chosen once and injected into every repository
#[derive(Clone)]
pub enum Backend {
    Relational(DbPool),
    Memory(Arc<MemoryStore>),
}

impl Backend {
    /// Fresh, isolated in-process store
    pub fn memory() -> Self {
        Backend::Memory(Arc::new(MemoryStore::new()))
    }

    /// Connect and make sure the schema exists
    pub async fn relational(config: &DatabaseConfig) -> Result<Self> {
        let pool = DbPool::new(config).await?;
        schema::ensure_schema(pool.write()).await.map_err(|e| AppError::BackendUnavailable {
            message: format!("Schema bootstrap failed: {}", e),
        })?;
        Ok(Backend::Relational(pool))
    }

    /// Resolve the configured backend. With `auto`, a relational store that is
    /// unreachable or refuses schema creation degrades to the in-memory store.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        match config.storage.backend {
            BackendKind::Memory => {
                info!("Using in-memory backend");
                Ok(Backend::memory())
            }
            BackendKind::Relational => {
                let backend = Backend::relational(&config.database).await?;
                info!("Using relational backend");
                Ok(backend)
            }
            BackendKind::Auto => match Backend::relational(&config.database).await {
                Ok(backend) => {
                    info!("Using relational backend");
                    Ok(backend)
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        "Relational backend unavailable, falling back to in-memory store (single instance only)"
                    );
                    Ok(Backend::memory())
                }
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Backend::Relational(_) => "relational",
            Backend::Memory(_) => "memory",
        }
    }

    pub fn is_relational(&self) -> bool {
        matches!(self, Backend::Relational(_))
    }

    pub async fn ping(&self) -> Result<()> {
        match self {
            Backend::Relational(pool) => pool.ping().await,
            Backend::Memory(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_config_selects_memory_backend() {
        let mut config = AppConfig::default();
        config.storage.backend = BackendKind::Memory;
        let backend = Backend::from_config(&config).await.unwrap();
        assert_eq!(backend.name(), "memory");
        assert!(backend.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_auto_falls_back_without_url() {
        let config = AppConfig::default();
        let backend = Backend::from_config(&config).await.unwrap();
        assert!(!backend.is_relational());
    }

    #[tokio::test]
    async fn test_relational_without_url_is_unavailable() {
        let mut config = AppConfig::default();
        config.storage.backend = BackendKind::Relational;
        let err = Backend::from_config(&config).await.err().unwrap();
        assert!(matches!(err, AppError::BackendUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_sqlite_backend_bootstraps_schema() {
        let backend = crate::testing::sqlite_backend().await;
        assert!(backend.is_relational());
        assert!(backend.ping().await.is_ok());
    }
}
