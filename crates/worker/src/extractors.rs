//! Extractor selection by file extension

use crate::errors::ExtractError;
use crate::pdf::PdfTextExtractor;
use async_trait::async_trait;
use redline_common::errors::Result;
use redline_common::extract::extension;
use redline_common::TextExtractor;

/// Extensions read as UTF-8 text
const PLAIN_TEXT_EXTENSIONS: &[&str] = &["txt", "text", "md", "markdown", "csv", "tsv", "json"];

/// UTF-8 text files, BOM stripped
pub struct PlainTextExtractor;

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract(&self, bytes: &[u8], filename: &str) -> Result<String> {
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        let text = std::str::from_utf8(bytes).map_err(|_| ExtractError::Encoding {
            filename: filename.to_string(),
        })?;
        Ok(text.replace("\r\n", "\n"))
    }
}

/// Dispatches to the PDF or plain-text extractor
pub struct ExtensionExtractor {
    plain: PlainTextExtractor,
    pdf: PdfTextExtractor,
}

impl ExtensionExtractor {
    pub fn new() -> Self {
        Self {
            plain: PlainTextExtractor,
            pdf: PdfTextExtractor,
        }
    }
}

impl Default for ExtensionExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextExtractor for ExtensionExtractor {
    async fn extract(&self, bytes: &[u8], filename: &str) -> Result<String> {
        match extension(filename).as_deref() {
            Some("pdf") => self.pdf.extract(bytes, filename).await,
            Some(ext) if PLAIN_TEXT_EXTENSIONS.contains(&ext) => self.plain.extract(bytes, filename).await,
            // Sniff files uploaded without an extension
            None if bytes.starts_with(b"%PDF") => self.pdf.extract(bytes, filename).await,
            None => self.plain.extract(bytes, filename).await,
            Some(ext) => Err(ExtractError::UnsupportedFormat(ext.to_string()).into()),
        }
    }
}
