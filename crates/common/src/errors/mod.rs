//! Error types for Redline
//!
//! Provides a single error taxonomy for the storage and processing layer:
//! - Distinct error types for lookup, conflict, state-machine and backend failures
//! - Machine-readable error codes for the HTTP layer to translate
//! - Classification of raw database errors (unique violations, lost connections)

use sea_orm::{DbErr, SqlErr};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    MissingField,

    // Resource errors (4xxx)
    NotFound,
    DocumentNotFound,
    ComparisonNotFound,
    QueueItemNotFound,

    // Conflict and state errors (5xxx)
    Conflict,
    InvalidTransition,
    Unsupported,

    // Database errors (7xxx)
    DatabaseError,
    BackendUnavailable,

    // External service errors (8xxx)
    StorageError,
    ExtractionError,
    ComparisonError,
    ComparisonTimeout,
    UpstreamError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,
            ErrorCode::MissingField => 1002,

            ErrorCode::NotFound => 4001,
            ErrorCode::DocumentNotFound => 4002,
            ErrorCode::ComparisonNotFound => 4003,
            ErrorCode::QueueItemNotFound => 4004,

            ErrorCode::Conflict => 5001,
            ErrorCode::InvalidTransition => 5002,
            ErrorCode::Unsupported => 5003,

            ErrorCode::DatabaseError => 7001,
            ErrorCode::BackendUnavailable => 7002,

            ErrorCode::StorageError => 8001,
            ErrorCode::ExtractionError => 8002,
            ErrorCode::ComparisonError => 8003,
            ErrorCode::ComparisonTimeout => 8004,
            ErrorCode::UpstreamError => 8005,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Required field missing: {field}")]
    MissingField { field: String },

    // Resource errors
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    // Conflict errors
    #[error("Duplicate resource: {message}")]
    Duplicate { message: String },

    #[error("Invalid {resource_type} transition for {id}: {from} -> {to}")]
    InvalidTransition {
        resource_type: String,
        id: String,
        from: String,
        to: String,
    },

    #[error("Operation {operation} is not supported on the {backend} backend")]
    Unsupported { operation: String, backend: String },

    // Database errors
    #[error("Database error: {0}")]
    Database(DbErr),

    #[error("Storage backend unavailable: {message}")]
    BackendUnavailable { message: String },

    // External collaborator errors
    #[error("Blob storage error: {message}")]
    Storage { message: String },

    #[error("Text extraction failed: {message}")]
    Extraction { message: String },

    #[error("Comparison service error: {message}")]
    ComparisonFailed { message: String },

    #[error("Comparison timeout after {timeout_ms}ms")]
    ComparisonTimeout { timeout_ms: u64 },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn not_found(resource_type: &str, id: impl ToString) -> Self {
        AppError::NotFound {
            resource_type: resource_type.to_string(),
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>, field: Option<&str>) -> Self {
        AppError::Validation {
            message: message.into(),
            field: field.map(str::to_string),
        }
    }

    pub fn invalid_transition(
        resource_type: &str,
        id: impl ToString,
        from: impl ToString,
        to: impl ToString,
    ) -> Self {
        AppError::InvalidTransition {
            resource_type: resource_type.to_string(),
            id: id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::MissingField { .. } => ErrorCode::MissingField,
            AppError::NotFound { resource_type, .. } => match resource_type.as_str() {
                "document" => ErrorCode::DocumentNotFound,
                "comparison" => ErrorCode::ComparisonNotFound,
                "queue_item" => ErrorCode::QueueItemNotFound,
                _ => ErrorCode::NotFound,
            },
            AppError::Duplicate { .. } => ErrorCode::Conflict,
            AppError::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            AppError::Unsupported { .. } => ErrorCode::Unsupported,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::BackendUnavailable { .. } => ErrorCode::BackendUnavailable,
            AppError::Storage { .. } => ErrorCode::StorageError,
            AppError::Extraction { .. } => ErrorCode::ExtractionError,
            AppError::ComparisonFailed { .. } => ErrorCode::ComparisonError,
            AppError::ComparisonTimeout { .. } => ErrorCode::ComparisonTimeout,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Errors caused by the caller's input or by the current state of a record
    pub fn is_client_error(&self) -> bool {
        matches!(self.code().as_code(), 1000..=5999)
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }

    /// Lookup misses are the only errors callers routinely treat as "absent"
    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound { .. })
    }
}

impl From<DbErr> for AppError {
    fn from(err: DbErr) -> Self {
        if let Some(SqlErr::UniqueConstraintViolation(message)) = err.sql_err() {
            return AppError::Duplicate { message };
        }

        match err {
            DbErr::ConnectionAcquire(e) => AppError::BackendUnavailable {
                message: e.to_string(),
            },
            DbErr::Conn(e) => AppError::BackendUnavailable {
                message: e.to_string(),
            },
            other => AppError::Database(other),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage {
            message: err.to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        let field = err.field_errors().keys().next().map(|f| f.to_string());
        AppError::Validation {
            message: err.to_string(),
            field,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::not_found("document", 7);
        assert_eq!(err.code(), ErrorCode::DocumentNotFound);
        assert!(err.is_client_error());
        assert!(err.is_not_found());
    }

    #[test]
    fn test_validation_error() {
        let err = AppError::validation("filename must not be empty", Some("filename"));
        assert_eq!(err.code().as_code(), 1001);
        assert!(!err.is_server_error());
        assert!(err.is_client_error());
    }

    #[test]
    fn test_transition_error_message() {
        let err = AppError::invalid_transition("comparison", 3, "completed", "processing");
        assert_eq!(err.code(), ErrorCode::InvalidTransition);
        assert_eq!(
            err.to_string(),
            "Invalid comparison transition for 3: completed -> processing"
        );
    }

    #[test]
    fn test_backend_errors_are_server_errors() {
        let err = AppError::BackendUnavailable {
            message: "connection refused".into(),
        };
        assert!(err.is_server_error());
        assert_eq!(err.code().as_code(), 7002);
    }

    #[test]
    fn test_db_error_classification() {
        let err: AppError = DbErr::RecordNotInserted.into();
        assert!(matches!(err, AppError::Database(_)));
    }
}
