//! Comparisons between two documents of the same owner

use crate::db::codec::{parse_status, RowCodec};
use crate::db::documents::DocumentCodec;
use crate::db::filter::Filter;
use crate::db::memory::{MemTable, MemoryStore};
use crate::db::models::{ComparisonActiveModel, ComparisonColumn, ComparisonEntity, ComparisonRow};
use crate::db::{Backend, Repository};
use crate::errors::{AppError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::{info, instrument};
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl ComparisonStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonStatus::Pending => "pending",
            ComparisonStatus::Processing => "processing",
            ComparisonStatus::Completed => "completed",
            ComparisonStatus::Error => "error",
        }
    }

    /// pending -> processing -> {completed, error}
    pub fn can_transition_to(&self, next: ComparisonStatus) -> bool {
        matches!(
            (self, next),
            (ComparisonStatus::Pending, ComparisonStatus::Processing)
                | (ComparisonStatus::Processing, ComparisonStatus::Completed)
                | (ComparisonStatus::Processing, ComparisonStatus::Error)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ComparisonStatus::Completed | ComparisonStatus::Error)
    }
}

impl fmt::Display for ComparisonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComparisonStatus {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ComparisonStatus::Pending),
            "processing" => Ok(ComparisonStatus::Processing),
            "completed" => Ok(ComparisonStatus::Completed),
            "error" => Ok(ComparisonStatus::Error),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub id: i32,
    pub document1_id: i32,
    pub document2_id: i32,
    pub comparison_result_url: Option<String>,
    pub comparison_summary: Option<String>,
    pub user_id: String,
    pub status: ComparisonStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Validate)]
pub struct NewComparison {
    #[validate(range(min = 1))]
    pub document1_id: i32,
    #[validate(range(min = 1))]
    pub document2_id: i32,
    #[validate(length(min = 1))]
    pub user_id: String,
}

impl NewComparison {
    pub fn new(document1_id: i32, document2_id: i32, user_id: impl Into<String>) -> Self {
        Self {
            document1_id,
            document2_id,
            user_id: user_id.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ComparisonPatch {
    pub status: Option<ComparisonStatus>,
    pub comparison_result_url: Option<String>,
    pub comparison_summary: Option<String>,
}

pub struct ComparisonCodec;

impl RowCodec for ComparisonCodec {
    type Table = ComparisonEntity;
    type Row = ComparisonRow;
    type ActiveRow = ComparisonActiveModel;
    type Record = Comparison;
    type NewRecord = NewComparison;
    type Patch = ComparisonPatch;

    const RESOURCE: &'static str = "comparison";

    fn id_column() -> ComparisonColumn {
        ComparisonColumn::Id
    }

    fn id(row: &ComparisonRow) -> i32 {
        row.id
    }

    fn set_id(row: &mut ComparisonRow, id: i32) {
        row.id = id;
    }

    fn encode(input: NewComparison, now: DateTime<Utc>) -> Result<ComparisonRow> {
        input.validate()?;

        if input.document1_id == input.document2_id {
            return Err(AppError::validation(
                "a document cannot be compared with itself",
                Some("document2_id"),
            ));
        }

        Ok(ComparisonRow {
            id: 0,
            document1_id: input.document1_id,
            document2_id: input.document2_id,
            comparison_result_url: None,
            comparison_summary: None,
            user_id: input.user_id,
            status: ComparisonStatus::Pending.as_str().to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    fn decode(row: &ComparisonRow) -> Result<Comparison> {
        Ok(Comparison {
            id: row.id,
            document1_id: row.document1_id,
            document2_id: row.document2_id,
            comparison_result_url: row.comparison_result_url.clone(),
            comparison_summary: row.comparison_summary.clone(),
            user_id: row.user_id.clone(),
            status: parse_status(Self::RESOURCE, row.id, &row.status)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    fn apply(row: &mut ComparisonRow, patch: ComparisonPatch, now: DateTime<Utc>) -> Result<()> {
        if let Some(status) = patch.status {
            row.status = status.as_str().to_string();
        }
        if let Some(url) = patch.comparison_result_url {
            row.comparison_result_url = Some(url);
        }
        if let Some(summary) = patch.comparison_summary {
            row.comparison_summary = Some(summary);
        }
        row.updated_at = now;
        Ok(())
    }

    fn memory(store: &MemoryStore) -> &Mutex<MemTable<ComparisonRow>> {
        &store.comparisons
    }

    fn conflict(existing: &ComparisonRow, candidate: &ComparisonRow) -> Option<String> {
        (existing.document1_id == candidate.document1_id
            && existing.document2_id == candidate.document2_id)
            .then(|| {
                format!(
                    "comparison of documents {} and {} already exists",
                    candidate.document1_id, candidate.document2_id
                )
            })
    }
}

#[derive(Clone)]
pub struct ComparisonRepository {
    inner: Repository<ComparisonCodec>,
    documents: Repository<DocumentCodec>,
}

impl ComparisonRepository {
    pub fn new(backend: Backend) -> Self {
        Self {
            inner: Repository::new(backend.clone()),
            documents: Repository::new(backend),
        }
    }

    pub fn records(&self) -> &Repository<ComparisonCodec> {
        &self.inner
    }

    /// Create a pending comparison. Both documents must exist and belong to
    /// the requesting user; the ordered pair must not be on file yet.
    #[instrument(skip(self, input), fields(user_id = %input.user_id))]
    pub async fn create(&self, input: NewComparison) -> Result<Comparison> {
        if input.document1_id == input.document2_id {
            return Err(AppError::validation(
                "a document cannot be compared with itself",
                Some("document2_id"),
            ));
        }

        for document_id in [input.document1_id, input.document2_id] {
            match self.documents.find_by_id(document_id).await? {
                Some(doc) if doc.user_id == input.user_id => {}
                _ => return Err(AppError::not_found(DocumentCodec::RESOURCE, document_id)),
            }
        }

        if let Some(existing) = self.find_by_pair(input.document1_id, input.document2_id).await? {
            return Err(AppError::Duplicate {
                message: format!(
                    "comparison {} already covers documents {} and {}",
                    existing.id, existing.document1_id, existing.document2_id
                ),
            });
        }

        let comparison = self.inner.create(input).await?;
        info!(
            comparison_id = comparison.id,
            document1_id = comparison.document1_id,
            document2_id = comparison.document2_id,
            "Comparison created"
        );
        Ok(comparison)
    }

    pub async fn find_by_id(&self, id: i32) -> Result<Option<Comparison>> {
        self.inner.find_by_id(id).await
    }

    pub async fn get(&self, id: i32) -> Result<Comparison> {
        self.inner.get(id).await
    }

    /// Exact ordered pair lookup
    pub async fn find_by_pair(&self, document1_id: i32, document2_id: i32) -> Result<Option<Comparison>> {
        let filter = Filter::new()
            .eq("document1_id", document1_id)
            .eq("document2_id", document2_id);
        Ok(self.inner.find_by_fields(&filter).await?.into_iter().next())
    }

    pub async fn find_by_user(&self, user_id: &str) -> Result<Vec<Comparison>> {
        self.inner
            .find_by_fields(&Filter::new().eq("user_id", user_id))
            .await
    }

    /// Comparisons referencing the document on either side, by id
    pub async fn find_by_document(&self, document_id: i32) -> Result<Vec<Comparison>> {
        let mut found = self
            .inner
            .find_by_fields(&Filter::new().eq("document1_id", document_id))
            .await?;
        found.extend(
            self.inner
                .find_by_fields(&Filter::new().eq("document2_id", document_id))
                .await?,
        );
        found.sort_by_key(|c| c.id);
        found.dedup_by_key(|c| c.id);
        Ok(found)
    }

    /// Move along pending -> processing -> {completed, error}
    pub async fn transition_status(&self, id: i32, next: ComparisonStatus) -> Result<Comparison> {
        let patch = ComparisonPatch {
            status: Some(next),
            ..Default::default()
        };
        self.transition(id, next, patch).await
    }

    /// Store the result pointer and summary and mark the comparison completed
    pub async fn record_result(&self, id: i32, result_url: String, summary: String) -> Result<Comparison> {
        let patch = ComparisonPatch {
            status: Some(ComparisonStatus::Completed),
            comparison_result_url: Some(result_url),
            comparison_summary: Some(summary),
        };
        self.transition(id, ComparisonStatus::Completed, patch).await
    }

    async fn transition(&self, id: i32, next: ComparisonStatus, patch: ComparisonPatch) -> Result<Comparison> {
        let current = self.inner.get(id).await?;
        if !current.status.can_transition_to(next) {
            return Err(AppError::invalid_transition(
                ComparisonCodec::RESOURCE,
                id,
                current.status,
                next,
            ));
        }

        let guard = Filter::new().eq("status", current.status.as_str());
        match self.inner.update_if(id, &guard, patch).await? {
            Some(comparison) => {
                info!(comparison_id = id, from = %current.status, to = %next, "Comparison status changed");
                Ok(comparison)
            }
            None => {
                let latest = self.inner.get(id).await?;
                Err(AppError::invalid_transition(
                    ComparisonCodec::RESOURCE,
                    id,
                    latest.status,
                    next,
                ))
            }
        }
    }

    pub async fn delete(&self, id: i32) -> Result<bool> {
        self.inner.delete(id).await
    }
}
