//! Test fixtures shared by module tests

use crate::compare::{Comparator, ComparisonOutcome, Difference};
use crate::config::DatabaseConfig;
use crate::db::Backend;
use crate::errors::{AppError, Result};
use crate::extract::TextExtractor;
use async_trait::async_trait;
use sea_orm::ConnectionTrait;

/// Relational backend on a private in-process SQLite database. A single
/// pooled connection keeps every query on the same `:memory:` database.
pub async fn sqlite_backend() -> Backend {
    let config = DatabaseConfig {
        url: Some("sqlite::memory:".to_string()),
        read_url: None,
        max_connections: 1,
        min_connections: 1,
        connect_timeout_secs: 5,
        idle_timeout_secs: 3600,
    };
    Backend::relational(&config)
        .await
        .expect("sqlite backend should bootstrap")
}

/// One isolated instance of each backend
pub async fn backends() -> Vec<Backend> {
    vec![Backend::memory(), sqlite_backend().await]
}

/// Deterministic 64-hex-digit hash for fixtures
pub fn sample_hash(seed: u8) -> String {
    format!("{:02x}", seed).repeat(32)
}

/// Decodes UTF-8; bytes starting with `%corrupt` fail extraction
pub struct StubExtractor;

#[async_trait]
impl TextExtractor for StubExtractor {
    async fn extract(&self, bytes: &[u8], filename: &str) -> Result<String> {
        if bytes.starts_with(b"%corrupt") {
            return Err(AppError::Extraction {
                message: format!("{} is corrupt", filename),
            });
        }
        String::from_utf8(bytes.to_vec()).map_err(|e| AppError::Extraction {
            message: e.to_string(),
        })
    }
}

/// Answers every comparison with a fixed outcome, or fails when none is set
pub struct FixedComparator {
    pub outcome: Option<ComparisonOutcome>,
}

impl FixedComparator {
    pub fn succeeding(summary: &str) -> Self {
        Self {
            outcome: Some(ComparisonOutcome {
                summary: summary.to_string(),
                differences: vec![Difference {
                    kind: "changed".into(),
                    description: "payment terms".into(),
                    left: Some("30 days".into()),
                    right: Some("60 days".into()),
                }],
                score: 0.8,
            }),
        }
    }

    pub fn failing() -> Self {
        Self { outcome: None }
    }
}

#[async_trait]
impl Comparator for FixedComparator {
    async fn compare(&self, _text1: &str, _text2: &str) -> Result<ComparisonOutcome> {
        self.outcome.clone().ok_or_else(|| AppError::ComparisonFailed {
            message: "model unavailable".to_string(),
        })
    }

    fn model_name(&self) -> &str {
        "fixed"
    }
}

/// Rename a table on a relational backend so statements touching it fail.
/// No-op on the in-memory backend.
pub async fn rename_table(backend: &Backend, from: &str, to: &str) {
    if let Backend::Relational(pool) = backend {
        pool.write()
            .execute_unprepared(&format!("ALTER TABLE {} RENAME TO {}", from, to))
            .await
            .expect("table rename should succeed");
    }
}
