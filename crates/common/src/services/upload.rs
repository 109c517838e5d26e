//! Upload flow

use crate::config::QueueConfig;
use crate::db::{Backend, Document, DocumentRepository, DocumentStatus, NewDocument, Stored};
use crate::errors::{AppError, Result};
use crate::extract::extension;
use crate::metrics;
use crate::queue::{ProcessingQueue, TaskType};
use crate::storage::BlobStore;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Accepts uploaded files and schedules their text extraction
#[derive(Clone)]
pub struct UploadService {
    documents: DocumentRepository,
    queue: ProcessingQueue,
    blobs: Arc<dyn BlobStore>,
    priority: i32,
}

impl UploadService {
    pub fn new(backend: Backend, blobs: Arc<dyn BlobStore>, config: &QueueConfig) -> Self {
        Self {
            documents: DocumentRepository::new(backend.clone()),
            queue: ProcessingQueue::new(backend, config.max_attempts),
            blobs,
            priority: config.default_priority,
        }
    }

    /// Store a file for `user_id`. A file whose content is already on record
    /// resolves to that document without writing a blob; it is only queued
    /// again if it never left `uploaded`.
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub async fn upload(&self, user_id: &str, original_name: &str, bytes: &[u8]) -> Result<Stored<Document>> {
        if bytes.is_empty() {
            return Err(AppError::validation("uploaded file is empty", Some("file")));
        }

        let file_hash = content_hash(bytes);

        if let Some(existing) = self.documents.find_by_hash(&file_hash).await? {
            if existing.user_id != user_id {
                warn!(document_id = existing.id, "Upload matched a document owned by another user");
            }
            info!(document_id = existing.id, "Upload matched existing content");
            metrics::record_dedup_hit();

            // An earlier upload may have stored the document but failed to queue it
            if existing.status == DocumentStatus::Uploaded {
                self.schedule(&existing).await?;
            }
            return Ok(Stored::Existing(existing));
        }

        let filename = stored_filename(&file_hash, original_name);
        let s3_url = self.blobs.put(&filename, bytes).await?;

        let created = self
            .documents
            .create(NewDocument {
                filename,
                original_name: original_name.to_string(),
                file_hash: file_hash.clone(),
                s3_url: s3_url.clone(),
                file_size: bytes.len() as i64,
                user_id: user_id.to_string(),
                status: None,
                is_standard: None,
                extracted_text: None,
                metadata: None,
            })
            .await;

        let stored = match created {
            Ok(stored) => stored,
            Err(e) => {
                self.discard_blob(&file_hash, &s3_url).await;
                return Err(e);
            }
        };

        if stored.get().status == DocumentStatus::Uploaded {
            self.schedule(stored.get()).await?;
        }

        Ok(stored)
    }

    async fn schedule(&self, doc: &Document) -> Result<()> {
        let queued = self
            .queue
            .enqueue(doc.id, TaskType::ExtractText, self.priority)
            .await?;
        if queued.is_new() {
            info!(document_id = doc.id, queue_item_id = queued.get().id, "Extraction queued");
        }
        Ok(())
    }

    /// Drop the blob of a document that was never recorded, unless a
    /// concurrent upload of the same content now owns it
    async fn discard_blob(&self, file_hash: &str, url: &str) {
        match self.documents.find_by_hash(file_hash).await {
            Ok(None) => {
                if let Err(e) = self.blobs.delete(url).await {
                    warn!(url, error = %e, "Failed to remove orphaned blob");
                }
            }
            Ok(Some(_)) => {}
            Err(e) => warn!(url, error = %e, "Left blob in place, owner lookup failed"),
        }
    }
}

/// Hex SHA-256 of the file content
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Content-addressed blob key keeping the upload's extension
fn stored_filename(hash: &str, original_name: &str) -> String {
    match extension(original_name) {
        Some(ext) if ext.chars().all(|c| c.is_ascii_alphanumeric()) => format!("{}.{}", hash, ext),
        _ => hash.to_string(),
    }
}
