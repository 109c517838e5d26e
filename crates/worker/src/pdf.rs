//! PDF text extraction module
//!
//! Extracts text content from PDF bytes using lopdf.

use crate::errors::ExtractError;
use async_trait::async_trait;
use lopdf::content::Content;
use lopdf::Object;
use redline_common::errors::Result;
use redline_common::TextExtractor;
use tracing::{debug, warn};

/// Kerning offsets in a TJ array beyond this are treated as word gaps
const WORD_GAP: f32 = -200.0;

pub struct PdfTextExtractor;

#[async_trait]
impl TextExtractor for PdfTextExtractor {
    async fn extract(&self, bytes: &[u8], filename: &str) -> Result<String> {
        let bytes = bytes.to_vec();
        let name = filename.to_string();

        // lopdf parsing is CPU-bound
        let text = tokio::task::spawn_blocking(move || extract_text_from_pdf(&bytes, &name))
            .await
            .map_err(|e| ExtractError::Aborted(e.to_string()))??;

        Ok(text)
    }
}

/// Extract text content from an in-memory PDF
pub fn extract_text_from_pdf(bytes: &[u8], filename: &str) -> std::result::Result<String, ExtractError> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| ExtractError::PdfParse {
        filename: filename.to_string(),
        message: format!("Failed to load PDF: {}", e),
    })?;

    let mut text = String::new();
    let pages = doc.get_pages();

    debug!(page_count = pages.len(), "Extracting text from PDF");

    for (page_num, page_id) in pages.iter() {
        match doc.get_page_content(*page_id) {
            Ok(content) => {
                text.push_str(&extract_text_from_content(&content));
                text.push('\n');
            }
            Err(e) => {
                warn!(page = page_num, error = %e, "Failed to read page content, skipping");
            }
        }
    }

    if text.trim().is_empty() {
        return Err(ExtractError::PdfParse {
            filename: filename.to_string(),
            message: "No text content extracted from PDF".to_string(),
        });
    }

    let cleaned = clean_text(&text);

    debug!(
        original_len = text.len(),
        cleaned_len = cleaned.len(),
        "Text extraction complete"
    );

    Ok(cleaned)
}

/// Collect the strings shown by text operators in a content stream
fn extract_text_from_content(content: &[u8]) -> String {
    let operations = match Content::decode(content) {
        Ok(content) => content.operations,
        Err(e) => {
            warn!(error = %e, "Undecodable content stream");
            return String::new();
        }
    };

    let mut text = String::new();

    for op in operations {
        match op.operator.as_str() {
            "Tj" => push_strings(&mut text, &op.operands),
            "'" | "\"" => {
                text.push(' ');
                push_strings(&mut text, &op.operands);
            }
            "TJ" => {
                for operand in &op.operands {
                    if let Object::Array(items) = operand {
                        for item in items {
                            match item {
                                Object::String(bytes, _) => text.push_str(&decode_pdf_string(bytes)),
                                Object::Integer(n) if (*n as f32) < WORD_GAP => text.push(' '),
                                Object::Real(n) if *n < WORD_GAP => text.push(' '),
                                _ => {}
                            }
                        }
                    }
                }
            }
            "Td" | "TD" | "T*" | "ET" => text.push(' '),
            _ => {}
        }
    }

    text
}

fn push_strings(text: &mut String, operands: &[Object]) {
    for operand in operands {
        if let Object::String(bytes, _) = operand {
            text.push_str(&decode_pdf_string(bytes));
        }
    }
}

/// PDF strings are either UTF-16BE with a BOM or a single-byte encoding
fn decode_pdf_string(bytes: &[u8]) -> String {
    if let Some(utf16) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = utf16
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }

    bytes.iter().map(|&b| b as char).collect()
}

/// Clean extracted text
fn clean_text(text: &str) -> String {
    text
        // Replace multiple whitespace with single space
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\u{FEFF}', "")
        // Normalize quotes
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::Operation;
    use lopdf::{dictionary, Document, Stream};

    fn sample_pdf(lines: &[&str]) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut operations = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 12.into()]),
        ];
        for line in lines {
            operations.push(Operation::new("Td", vec![0.into(), (-14).into()]));
            operations.push(Operation::new("Tj", vec![Object::string_literal(*line)]));
        }
        operations.push(Operation::new("ET", vec![]));

        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_clean_text() {
        let input = "Hello   World\n\nTest";
        let cleaned = clean_text(input);
        assert_eq!(cleaned, "Hello World Test");
        assert_eq!(clean_text("\u{201C}quoted\u{201D}"), "\"quoted\"");
    }

    #[test]
    fn test_decode_pdf_string() {
        assert_eq!(decode_pdf_string(b"Caf\xe9"), "Caf\u{e9}");
        assert_eq!(decode_pdf_string(&[0xFE, 0xFF, 0x00, 0x41, 0x00, 0x42]), "AB");
    }

    #[test]
    fn test_extracts_shown_text() {
        let pdf = sample_pdf(&["Payment due in 30 days.", "Governing law: Delaware."]);
        let text = extract_text_from_pdf(&pdf, "terms.pdf").unwrap();
        assert_eq!(text, "Payment due in 30 days. Governing law: Delaware.");
    }

    #[test]
    fn test_garbage_is_a_parse_error() {
        let err = extract_text_from_pdf(b"not a pdf", "x.pdf").unwrap_err();
        assert!(matches!(err, ExtractError::PdfParse { .. }));
    }

    #[tokio::test]
    async fn test_async_extractor_maps_errors() {
        let err = PdfTextExtractor.extract(b"%PDF-broken", "x.pdf").await.unwrap_err();
        assert!(matches!(err, redline_common::AppError::Extraction { .. }));
    }
}
