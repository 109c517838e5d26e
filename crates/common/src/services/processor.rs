//! Queue drain: text extraction for uploaded documents

use crate::db::{Backend, DocumentRepository, DocumentStatus};
use crate::errors::{AppError, Result};
use crate::extract::{text_metadata, TextExtractor};
use crate::metrics::{self, StageTimer};
use crate::queue::{ProcessingQueue, QueueItem, QueueStatus, TaskType};
use crate::storage::BlobStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Outcome counts of one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub claimed: usize,
    pub completed: usize,
    /// Failed and returned to pending
    pub retried: usize,
    /// Failed permanently
    pub failed: usize,
}

impl DrainReport {
    pub fn is_empty(&self) -> bool {
        self.claimed == 0
    }
}

/// Claims extraction tasks and applies their results to documents
#[derive(Clone)]
pub struct QueueProcessor {
    documents: DocumentRepository,
    queue: ProcessingQueue,
    blobs: Arc<dyn BlobStore>,
    extractor: Arc<dyn TextExtractor>,
}

impl QueueProcessor {
    pub fn new(
        backend: Backend,
        max_attempts: i32,
        blobs: Arc<dyn BlobStore>,
        extractor: Arc<dyn TextExtractor>,
    ) -> Self {
        Self {
            documents: DocumentRepository::new(backend.clone()),
            queue: ProcessingQueue::new(backend, max_attempts),
            blobs,
            extractor,
        }
    }

    pub fn queue(&self) -> &ProcessingQueue {
        &self.queue
    }

    /// Process up to `limit` pending extraction tasks. Failed items are
    /// released only after the pass, so a retry is never picked up by the
    /// same pass that failed it. They are released even when the pass itself
    /// stops on an error, which is then returned.
    #[instrument(skip(self))]
    pub async fn drain(&self, limit: usize) -> Result<DrainReport> {
        let mut report = DrainReport::default();
        let mut failures = Vec::new();

        let pass = self.run_pass(limit, &mut report, &mut failures).await;
        let released = self.release_failures(failures, &mut report).await;

        if !report.is_empty() {
            info!(
                claimed = report.claimed,
                completed = report.completed,
                retried = report.retried,
                failed = report.failed,
                "Drain pass finished"
            );
        }

        pass?;
        released?;
        Ok(report)
    }

    async fn run_pass(
        &self,
        limit: usize,
        report: &mut DrainReport,
        failures: &mut Vec<(i32, String)>,
    ) -> Result<()> {
        while report.claimed < limit {
            let Some(item) = self.queue.claim_next(TaskType::ExtractText).await? else {
                break;
            };
            report.claimed += 1;

            match self.extract(&item).await {
                Ok(()) => match self.queue.complete(item.id).await {
                    Ok(_) => report.completed += 1,
                    Err(e) => {
                        failures.push((item.id, e.to_string()));
                        return Err(e);
                    }
                },
                Err(e) => failures.push((item.id, e.to_string())),
            }
        }
        Ok(())
    }

    /// Return failed items to the queue; keeps going past errors and
    /// reports the first one
    async fn release_failures(&self, failures: Vec<(i32, String)>, report: &mut DrainReport) -> Result<()> {
        let mut first_error = None;

        for (id, message) in failures {
            match self.queue.fail(id, &message).await {
                Ok(item) if item.status == QueueStatus::Failed => {
                    report.failed += 1;
                    self.mark_document_error(item.document_id).await;
                }
                Ok(_) => report.retried += 1,
                Err(e) => {
                    error!(queue_item_id = id, error = %e, "Failed to release queue item");
                    first_error.get_or_insert(e);
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    async fn extract(&self, item: &QueueItem) -> Result<()> {
        let mut doc = self.documents.get(item.document_id).await?;

        if doc.status.is_terminal() {
            debug!(document_id = doc.id, status = %doc.status, "Document already resolved, skipping extraction");
            return Ok(());
        }

        if doc.status == DocumentStatus::Uploaded {
            doc = self
                .documents
                .advance_status(doc.id, DocumentStatus::Processing)
                .await?;
        }

        let bytes = self.blobs.get(&doc.s3_url).await?;

        let timer = StageTimer::start();
        let extracted = self.extractor.extract(&bytes, &doc.original_name).await;
        let text = match extracted {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                metrics::record_extraction(timer.elapsed_secs(), 0, false);
                return Err(AppError::Extraction {
                    message: format!("no text found in {}", doc.original_name),
                });
            }
            Err(e) => {
                metrics::record_extraction(timer.elapsed_secs(), 0, false);
                return Err(e);
            }
        };

        let chars = text.chars().count();
        metrics::record_extraction(timer.elapsed_secs(), chars, true);

        self.documents
            .record_extraction(doc.id, text.clone(), text_metadata(&text))
            .await?;

        info!(document_id = doc.id, chars, "Text extracted");
        Ok(())
    }

    /// The task gave up; the document cannot be processed any further
    async fn mark_document_error(&self, document_id: i32) {
        match self
            .documents
            .advance_status(document_id, DocumentStatus::Error)
            .await
        {
            Ok(_) => warn!(document_id, "Document marked as error"),
            Err(e) if e.is_client_error() => {
                debug!(document_id, error = %e, "Document not moved to error");
            }
            Err(e) => error!(document_id, error = %e, "Failed to mark document as error"),
        }
    }
}
