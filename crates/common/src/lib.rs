//! Redline Common Library
//!
//! Shared code for the Redline services including:
//! - Document, comparison, export and queue repositories
//! - Backend selection (relational or in-process) and schema bootstrap
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability
//! - Blob storage, text extraction and comparison interfaces
//! - Upload, queue-drain and comparison services

pub mod compare;
pub mod config;
pub mod db;
pub mod errors;
pub mod extract;
pub mod metrics;
pub mod queue;
pub mod services;
pub mod storage;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use compare::{Comparator, ComparisonOutcome};
pub use config::AppConfig;
pub use db::{Backend, Repository};
pub use errors::{AppError, Result};
pub use extract::TextExtractor;
pub use queue::{ProcessingQueue, TaskType};
pub use storage::BlobStore;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
