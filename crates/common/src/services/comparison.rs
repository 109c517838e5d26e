//! Comparison flow

use crate::compare::{Comparator, ComparisonOutcome};
use crate::db::{
    Backend, Comparison, ComparisonRepository, ComparisonStatus, Document, DocumentRepository,
    DocumentStatus, NewComparison,
};
use crate::errors::{AppError, Result};
use crate::metrics::{self, StageTimer};
use crate::storage::BlobStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};

/// Comparison result as written to blob storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResult {
    pub comparison_id: i32,
    pub model: String,
    pub completed_at: DateTime<Utc>,
    pub outcome: ComparisonOutcome,
}

#[derive(Clone)]
pub struct ComparisonService {
    documents: DocumentRepository,
    comparisons: ComparisonRepository,
    blobs: Arc<dyn BlobStore>,
    comparator: Arc<dyn Comparator>,
}

impl ComparisonService {
    pub fn new(backend: Backend, blobs: Arc<dyn BlobStore>, comparator: Arc<dyn Comparator>) -> Self {
        Self {
            documents: DocumentRepository::new(backend.clone()),
            comparisons: ComparisonRepository::new(backend),
            blobs,
            comparator,
        }
    }

    /// Compare two processed documents owned by `user_id`
    #[instrument(skip(self))]
    pub async fn compare(&self, user_id: &str, document1_id: i32, document2_id: i32) -> Result<Comparison> {
        if document1_id == document2_id {
            return Err(AppError::validation(
                "a document cannot be compared with itself",
                Some("document2_id"),
            ));
        }

        let (first, second) = futures::try_join!(
            self.comparable(user_id, document1_id),
            self.comparable(user_id, document2_id),
        )?;

        let comparison = self
            .comparisons
            .create(NewComparison::new(first.id, second.id, user_id))
            .await?;
        let comparison = self
            .comparisons
            .transition_status(comparison.id, ComparisonStatus::Processing)
            .await?;

        let timer = StageTimer::start();
        match self.run(&comparison, &first, &second).await {
            Ok(done) => {
                metrics::record_comparison(timer.elapsed_secs(), true);
                info!(comparison_id = done.id, "Comparison completed");
                Ok(done)
            }
            Err(e) => {
                metrics::record_comparison(timer.elapsed_secs(), false);
                error!(comparison_id = comparison.id, error = %e, "Comparison failed");
                if let Err(mark) = self
                    .comparisons
                    .transition_status(comparison.id, ComparisonStatus::Error)
                    .await
                {
                    error!(comparison_id = comparison.id, error = %mark, "Failed to mark comparison as error");
                }
                Err(e)
            }
        }
    }

    /// Compare a document against the user's standard document
    pub async fn compare_with_standard(&self, user_id: &str, document_id: i32) -> Result<Comparison> {
        let standard = self
            .documents
            .get_standard_document(user_id)
            .await?
            .ok_or_else(|| AppError::not_found("standard_document", user_id))?;

        self.compare(user_id, standard.id, document_id).await
    }

    /// Read back the stored outcome of a completed comparison
    pub async fn fetch_result(&self, user_id: &str, comparison_id: i32) -> Result<StoredResult> {
        let comparison = match self.comparisons.find_by_id(comparison_id).await? {
            Some(c) if c.user_id == user_id => c,
            _ => return Err(AppError::not_found("comparison", comparison_id)),
        };

        let url = comparison.comparison_result_url.ok_or_else(|| {
            AppError::invalid_transition("comparison", comparison_id, comparison.status, "read")
        })?;

        let bytes = self.blobs.get(&url).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn run(&self, comparison: &Comparison, first: &Document, second: &Document) -> Result<Comparison> {
        let outcome = self
            .comparator
            .compare(text_of(first), text_of(second))
            .await?;

        let stored = StoredResult {
            comparison_id: comparison.id,
            model: self.comparator.model_name().to_string(),
            completed_at: Utc::now(),
            outcome,
        };
        let bytes = serde_json::to_vec(&stored)?;
        let url = self
            .blobs
            .put(&format!("comparison-{}.json", comparison.id), &bytes)
            .await?;

        self.comparisons
            .record_result(comparison.id, url, stored.outcome.summary)
            .await
    }

    async fn comparable(&self, user_id: &str, document_id: i32) -> Result<Document> {
        let doc = match self.documents.find_by_id(document_id).await? {
            Some(doc) if doc.user_id == user_id => doc,
            _ => return Err(AppError::not_found("document", document_id)),
        };

        if doc.status != DocumentStatus::Processed || doc.extracted_text.is_none() {
            return Err(AppError::validation(
                format!("document {} has not been processed yet ({})", doc.id, doc.status),
                Some("document_id"),
            ));
        }

        Ok(doc)
    }
}

fn text_of(doc: &Document) -> &str {
    doc.extracted_text.as_deref().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NewDocument;
    use crate::storage::MemoryBlobStore;
    use crate::testing::{backends, sample_hash, FixedComparator};

    async fn processed(backend: &Backend, user: &str, seed: u8, text: &str) -> Document {
        let docs = DocumentRepository::new(backend.clone());
        let doc = docs
            .create(NewDocument {
                filename: format!("{}.txt", seed),
                original_name: format!("clause-{}.txt", seed),
                file_hash: sample_hash(seed),
                s3_url: format!("memory://{}", seed),
                file_size: text.len() as i64,
                user_id: user.to_string(),
                status: None,
                is_standard: None,
                extracted_text: None,
                metadata: None,
            })
            .await
            .unwrap()
            .into_inner();
        docs.advance_status(doc.id, DocumentStatus::Processing).await.unwrap();
        docs.record_extraction(doc.id, text.to_string(), Default::default())
            .await
            .unwrap()
    }

    fn service(backend: Backend, comparator: FixedComparator) -> (ComparisonService, Arc<MemoryBlobStore>) {
        let blobs = Arc::new(MemoryBlobStore::new());
        (
            ComparisonService::new(backend, blobs.clone(), Arc::new(comparator)),
            blobs,
        )
    }

    #[tokio::test]
    async fn test_compare_stores_result() {
        for backend in backends().await {
            let a = processed(&backend, "u1", 1, "net 30").await;
            let b = processed(&backend, "u1", 2, "net 60").await;
            let (svc, blobs) = service(backend, FixedComparator::succeeding("payment terms differ"));

            let done = svc.compare("u1", a.id, b.id).await.unwrap();
            assert_eq!(done.status, ComparisonStatus::Completed);
            assert_eq!(done.comparison_summary.as_deref(), Some("payment terms differ"));
            assert_eq!(blobs.len(), 1);

            let result = svc.fetch_result("u1", done.id).await.unwrap();
            assert_eq!(result.comparison_id, done.id);
            assert_eq!(result.model, "fixed");
            assert_eq!(result.outcome.differences.len(), 1);

            assert!(svc.fetch_result("u2", done.id).await.unwrap_err().is_not_found());
        }
    }

    #[tokio::test]
    async fn test_comparator_failure_marks_error() {
        for backend in backends().await {
            let a = processed(&backend, "u1", 1, "alpha").await;
            let b = processed(&backend, "u1", 2, "beta").await;
            let repo = ComparisonRepository::new(backend.clone());
            let (svc, blobs) = service(backend, FixedComparator::failing());

            let err = svc.compare("u1", a.id, b.id).await.unwrap_err();
            assert!(matches!(err, AppError::ComparisonFailed { .. }));
            assert!(blobs.is_empty());

            let stored = repo.find_by_pair(a.id, b.id).await.unwrap().unwrap();
            assert_eq!(stored.status, ComparisonStatus::Error);
            assert!(stored.comparison_result_url.is_none());
        }
    }

    #[tokio::test]
    async fn test_unprocessed_document_rejected() {
        for backend in backends().await {
            let a = processed(&backend, "u1", 1, "alpha").await;
            let pending = DocumentRepository::new(backend.clone())
                .create(NewDocument {
                    filename: "x.txt".into(),
                    original_name: "x.txt".into(),
                    file_hash: sample_hash(9),
                    s3_url: "memory://x".into(),
                    file_size: 1,
                    user_id: "u1".into(),
                    status: None,
                    is_standard: None,
                    extracted_text: None,
                    metadata: None,
                })
                .await
                .unwrap()
                .into_inner();
            let (svc, _) = service(backend.clone(), FixedComparator::succeeding("n/a"));

            let err = svc.compare("u1", a.id, pending.id).await.unwrap_err();
            assert!(matches!(err, AppError::Validation { .. }));
            assert!(ComparisonRepository::new(backend).find_by_user("u1").await.unwrap().is_empty());

            let err = svc.compare("u1", a.id, a.id).await.unwrap_err();
            assert!(matches!(err, AppError::Validation { .. }));

            assert!(svc.compare("u2", a.id, pending.id).await.unwrap_err().is_not_found());
        }
    }

    #[tokio::test]
    async fn test_compare_with_standard() {
        for backend in backends().await {
            let standard = processed(&backend, "u1", 1, "template").await;
            let draft = processed(&backend, "u1", 2, "draft").await;
            let (svc, _) = service(backend.clone(), FixedComparator::succeeding("close"));

            let err = svc.compare_with_standard("u1", draft.id).await.unwrap_err();
            assert!(err.is_not_found());

            DocumentRepository::new(backend)
                .set_standard("u1", standard.id)
                .await
                .unwrap();
            let done = svc.compare_with_standard("u1", draft.id).await.unwrap();
            assert_eq!(done.document1_id, standard.id);
            assert_eq!(done.document2_id, draft.id);
        }
    }
}
