//! Text extraction interface
//!
//! Implementations live with the process that runs them (the worker ships
//! plain-text and PDF extractors).

use crate::db::Metadata;
use crate::errors::Result;
use async_trait::async_trait;
use chrono::Utc;

#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Extract plain text from a stored file. `filename` is the name the user
    /// uploaded and is only used to pick a format.
    async fn extract(&self, bytes: &[u8], filename: &str) -> Result<String>;
}

/// Lower-cased extension of `filename`, if it has one
pub fn extension(filename: &str) -> Option<String> {
    let (stem, ext) = filename.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Metadata recorded alongside extracted text
pub fn text_metadata(text: &str) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("char_count".into(), text.chars().count().into());
    metadata.insert("word_count".into(), text.split_whitespace().count().into());
    metadata.insert("extracted_at".into(), Utc::now().to_rfc3339().into());
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension() {
        assert_eq!(extension("Contract.PDF").as_deref(), Some("pdf"));
        assert_eq!(extension("notes.v2.md").as_deref(), Some("md"));
        assert_eq!(extension("README"), None);
        assert_eq!(extension(".env"), None);
        assert_eq!(extension("trailing."), None);
    }

    #[test]
    fn test_text_metadata_counts() {
        let meta = text_metadata("The  quick\nbrown fox");
        assert_eq!(meta["word_count"], 4);
        assert_eq!(meta["char_count"], 20);
        assert!(meta["extracted_at"].is_string());
    }
}
