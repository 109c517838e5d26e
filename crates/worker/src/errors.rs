//! Worker error types

use redline_common::errors::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("PDF parse error for {filename}: {message}")]
    PdfParse { filename: String, message: String },

    #[error("{filename} is not valid UTF-8 text")]
    Encoding { filename: String },

    #[error("Unsupported file type: {0}")]
    UnsupportedFormat(String),

    #[error("Extraction task aborted: {0}")]
    Aborted(String),
}

impl From<ExtractError> for AppError {
    fn from(e: ExtractError) -> Self {
        AppError::Extraction {
            message: e.to_string(),
        }
    }
}
