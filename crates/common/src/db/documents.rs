//! Documents: uploaded files, their processing status and standard flag

use crate::db::codec::{decode_metadata, encode_metadata, parse_status, Metadata, RowCodec, Stored};
use crate::db::comparisons::ComparisonCodec;
use crate::db::exports::ExportCodec;
use crate::db::filter::Filter;
use crate::db::memory::{lock, MemTable, MemoryStore};
use crate::db::models::{
    ComparisonColumn, ComparisonEntity, DocumentActiveModel, DocumentColumn, DocumentEntity,
    DocumentRow, ExportColumn, ExportEntity, QueueItemColumn, QueueItemEntity,
};
use crate::db::{Backend, Repository};
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::queue::QueueItemCodec;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, Condition, EntityTrait, QueryFilter, QuerySelect, TransactionTrait};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::{info, instrument, warn};
use validator::Validate;

/// Processing status; only ever advances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Uploaded,
    Processing,
    Processed,
    Error,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Uploaded => "uploaded",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Processed => "processed",
            DocumentStatus::Error => "error",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            DocumentStatus::Uploaded => 0,
            DocumentStatus::Processing => 1,
            DocumentStatus::Processed | DocumentStatus::Error => 2,
        }
    }

    /// Forward-only: uploaded < processing < {processed, error}
    pub fn can_advance_to(&self, next: DocumentStatus) -> bool {
        next.rank() > self.rank()
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 2
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "uploaded" => Ok(DocumentStatus::Uploaded),
            "processing" => Ok(DocumentStatus::Processing),
            "processed" => Ok(DocumentStatus::Processed),
            "error" => Ok(DocumentStatus::Error),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: i32,
    pub filename: String,
    pub original_name: String,
    pub file_hash: String,
    pub s3_url: String,
    pub file_size: i64,
    pub user_id: String,
    pub status: DocumentStatus,
    pub is_standard: bool,
    pub extracted_text: Option<String>,
    pub metadata: Option<Metadata>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Creation input. Unset status/flag/text/metadata take the upload defaults.
#[derive(Debug, Clone, Validate)]
pub struct NewDocument {
    #[validate(length(min = 1, max = 255))]
    pub filename: String,
    #[validate(length(min = 1, max = 1024))]
    pub original_name: String,
    #[validate(length(equal = 64))]
    pub file_hash: String,
    #[validate(length(min = 1))]
    pub s3_url: String,
    #[validate(range(min = 0))]
    pub file_size: i64,
    #[validate(length(min = 1))]
    pub user_id: String,
    pub status: Option<DocumentStatus>,
    pub is_standard: Option<bool>,
    pub extracted_text: Option<String>,
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Clone, Default)]
pub struct DocumentPatch {
    pub status: Option<DocumentStatus>,
    pub is_standard: Option<bool>,
    pub extracted_text: Option<String>,
    /// Replaces the stored metadata
    pub metadata: Option<Metadata>,
}

pub struct DocumentCodec;

impl RowCodec for DocumentCodec {
    type Table = DocumentEntity;
    type Row = DocumentRow;
    type ActiveRow = DocumentActiveModel;
    type Record = Document;
    type NewRecord = NewDocument;
    type Patch = DocumentPatch;

    const RESOURCE: &'static str = "document";

    fn id_column() -> DocumentColumn {
        DocumentColumn::Id
    }

    fn id(row: &DocumentRow) -> i32 {
        row.id
    }

    fn set_id(row: &mut DocumentRow, id: i32) {
        row.id = id;
    }

    fn encode(input: NewDocument, now: DateTime<Utc>) -> Result<DocumentRow> {
        input.validate()?;

        if !input.file_hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AppError::validation(
                "file_hash must be a hex-encoded SHA-256 digest",
                Some("file_hash"),
            ));
        }

        Ok(DocumentRow {
            id: 0,
            filename: input.filename,
            original_name: input.original_name,
            file_hash: input.file_hash.to_ascii_lowercase(),
            s3_url: input.s3_url,
            file_size: input.file_size,
            user_id: input.user_id,
            status: input.status.unwrap_or(DocumentStatus::Uploaded).as_str().to_string(),
            is_standard: input.is_standard.unwrap_or(false),
            extracted_text: input.extracted_text,
            metadata: encode_metadata(input.metadata.as_ref())?,
            created_at: now,
            updated_at: now,
        })
    }

    fn decode(row: &DocumentRow) -> Result<Document> {
        Ok(Document {
            id: row.id,
            filename: row.filename.clone(),
            original_name: row.original_name.clone(),
            file_hash: row.file_hash.clone(),
            s3_url: row.s3_url.clone(),
            file_size: row.file_size,
            user_id: row.user_id.clone(),
            status: parse_status(Self::RESOURCE, row.id, &row.status)?,
            is_standard: row.is_standard,
            extracted_text: row.extracted_text.clone(),
            metadata: decode_metadata(row.metadata.as_deref())?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    fn apply(row: &mut DocumentRow, patch: DocumentPatch, now: DateTime<Utc>) -> Result<()> {
        if let Some(status) = patch.status {
            row.status = status.as_str().to_string();
        }
        if let Some(flag) = patch.is_standard {
            row.is_standard = flag;
        }
        if let Some(text) = patch.extracted_text {
            row.extracted_text = Some(text);
        }
        if let Some(metadata) = patch.metadata {
            row.metadata = encode_metadata(Some(&metadata))?;
        }
        row.updated_at = now;
        Ok(())
    }

    fn memory(store: &MemoryStore) -> &Mutex<MemTable<DocumentRow>> {
        &store.documents
    }

    fn conflict(existing: &DocumentRow, candidate: &DocumentRow) -> Option<String> {
        if existing.file_hash == candidate.file_hash {
            return Some(format!("document with hash {} already exists", candidate.file_hash));
        }
        if candidate.is_standard && existing.is_standard && existing.user_id == candidate.user_id {
            return Some(format!("user {} already has a standard document", candidate.user_id));
        }
        None
    }
}

/// Document persistence with hash dedup and standard-document bookkeeping
#[derive(Clone)]
pub struct DocumentRepository {
    inner: Repository<DocumentCodec>,
}

impl DocumentRepository {
    pub fn new(backend: Backend) -> Self {
        Self {
            inner: Repository::new(backend),
        }
    }

    /// Generic CRUD access for callers that need raw filters
    pub fn records(&self) -> &Repository<DocumentCodec> {
        &self.inner
    }

    /// Create a document unless one with the same content hash exists, in
    /// which case the existing record is returned untouched. Dedup is global
    /// across owners.
    #[instrument(skip(self, input), fields(user_id = %input.user_id))]
    pub async fn create(&self, input: NewDocument) -> Result<Stored<Document>> {
        let hash = input.file_hash.to_ascii_lowercase();

        if let Some(existing) = self.find_by_hash(&hash).await? {
            if existing.user_id != input.user_id {
                warn!(
                    document_id = existing.id,
                    "Upload matched a document owned by another user"
                );
            }
            info!(document_id = existing.id, "Duplicate upload resolved to existing document");
            metrics::record_dedup_hit();
            return Ok(Stored::Existing(existing));
        }

        match self.inner.create(input).await {
            Ok(doc) => {
                info!(document_id = doc.id, "Document created");
                metrics::record_document_created();
                Ok(Stored::Created(doc))
            }
            // Lost a concurrent insert of the same file
            Err(AppError::Duplicate { message }) => match self.find_by_hash(&hash).await? {
                Some(existing) => {
                    metrics::record_dedup_hit();
                    Ok(Stored::Existing(existing))
                }
                None => Err(AppError::Duplicate { message }),
            },
            Err(e) => Err(e),
        }
    }

    pub async fn find_by_id(&self, id: i32) -> Result<Option<Document>> {
        self.inner.find_by_id(id).await
    }

    pub async fn get(&self, id: i32) -> Result<Document> {
        self.inner.get(id).await
    }

    pub async fn find_by_hash(&self, hash: &str) -> Result<Option<Document>> {
        self.inner
            .find_by_field("file_hash", hash.to_ascii_lowercase())
            .await
    }

    /// The user's reference document, if one is set
    pub async fn get_standard_document(&self, user_id: &str) -> Result<Option<Document>> {
        let filter = Filter::new().eq("user_id", user_id).eq("is_standard", true);
        Ok(self.inner.find_by_fields(&filter).await?.into_iter().next())
    }

    pub async fn find_by_status(&self, status: DocumentStatus, user_id: Option<&str>) -> Result<Vec<Document>> {
        let mut filter = Filter::new().eq("status", status.as_str());
        if let Some(user_id) = user_id {
            filter = filter.eq("user_id", user_id);
        }
        self.inner.find_by_fields(&filter).await
    }

    pub async fn find_by_user(&self, user_id: &str) -> Result<Vec<Document>> {
        self.inner
            .find_by_fields(&Filter::new().eq("user_id", user_id))
            .await
    }

    /// Make `document_id` the user's only standard document. The previous
    /// standard is cleared in the same atomic step.
    #[instrument(skip(self))]
    pub async fn set_standard(&self, user_id: &str, document_id: i32) -> Result<Document> {
        let now = Utc::now();

        match self.inner.backend() {
            Backend::Relational(pool) => {
                let txn = pool.write().begin().await?;

                // Serialise concurrent set_standard calls for the same user
                let owned = DocumentEntity::find()
                    .filter(DocumentColumn::UserId.eq(user_id))
                    .lock_exclusive()
                    .all(&txn)
                    .await?;

                if !owned.iter().any(|d| d.id == document_id) {
                    return Err(AppError::not_found(DocumentCodec::RESOURCE, document_id));
                }

                DocumentEntity::update_many()
                    .col_expr(DocumentColumn::IsStandard, Expr::value(false))
                    .col_expr(DocumentColumn::UpdatedAt, Expr::value(now))
                    .filter(DocumentColumn::UserId.eq(user_id))
                    .filter(DocumentColumn::IsStandard.eq(true))
                    .filter(DocumentColumn::Id.ne(document_id))
                    .exec(&txn)
                    .await?;

                DocumentEntity::update_many()
                    .col_expr(DocumentColumn::IsStandard, Expr::value(true))
                    .col_expr(DocumentColumn::UpdatedAt, Expr::value(now))
                    .filter(DocumentColumn::Id.eq(document_id))
                    .exec(&txn)
                    .await?;

                txn.commit().await?;
            }
            Backend::Memory(store) => {
                let mut table = lock(&store.documents, DocumentCodec::RESOURCE)?;

                match table.get(document_id) {
                    Some(row) if row.user_id == user_id => {}
                    _ => return Err(AppError::not_found(DocumentCodec::RESOURCE, document_id)),
                }

                for row in table.iter_mut() {
                    if row.user_id != user_id {
                        continue;
                    }
                    let flag = row.id == document_id;
                    if row.is_standard != flag {
                        row.is_standard = flag;
                        row.updated_at = now;
                    }
                }
            }
        }

        info!(document_id, "Standard document set");
        self.inner.get(document_id).await
    }

    /// Unset the user's standard document; returns whether one was set
    pub async fn clear_standard(&self, user_id: &str) -> Result<bool> {
        let Some(current) = self.get_standard_document(user_id).await? else {
            return Ok(false);
        };

        let patch = DocumentPatch {
            is_standard: Some(false),
            ..Default::default()
        };
        let guard = Filter::new().eq("is_standard", true);
        Ok(self.inner.update_if(current.id, &guard, patch).await?.is_some())
    }

    /// Move the document forward in its lifecycle
    pub async fn advance_status(&self, id: i32, next: DocumentStatus) -> Result<Document> {
        let patch = DocumentPatch {
            status: Some(next),
            ..Default::default()
        };
        self.advance(id, next, patch).await
    }

    /// Store extracted text, merge metadata and mark the document processed
    pub async fn record_extraction(&self, id: i32, text: String, metadata: Metadata) -> Result<Document> {
        let current = self.inner.get(id).await?;

        let mut merged = current.metadata.unwrap_or_default();
        merged.extend(metadata);

        let patch = DocumentPatch {
            status: Some(DocumentStatus::Processed),
            extracted_text: Some(text),
            metadata: Some(merged),
            ..Default::default()
        };
        self.advance(id, DocumentStatus::Processed, patch).await
    }

    async fn advance(&self, id: i32, next: DocumentStatus, patch: DocumentPatch) -> Result<Document> {
        let current = self.inner.get(id).await?;
        if !current.status.can_advance_to(next) {
            return Err(AppError::invalid_transition(
                DocumentCodec::RESOURCE,
                id,
                current.status,
                next,
            ));
        }

        let guard = Filter::new().eq("status", current.status.as_str());
        match self.inner.update_if(id, &guard, patch).await? {
            Some(doc) => {
                info!(document_id = id, from = %current.status, to = %next, "Document status advanced");
                Ok(doc)
            }
            None => {
                let latest = self.inner.get(id).await?;
                Err(AppError::invalid_transition(
                    DocumentCodec::RESOURCE,
                    id,
                    latest.status,
                    next,
                ))
            }
        }
    }

    /// Delete the document with its comparisons, their exports and its queue
    /// items. Returns `false` if the document did not exist.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: i32) -> Result<bool> {
        let (comparisons, dequeued, removed) = match self.inner.backend() {
            Backend::Relational(pool) => {
                let txn = pool.write().begin().await?;

                let dependents: Vec<i32> = ComparisonEntity::find()
                    .select_only()
                    .column(ComparisonColumn::Id)
                    .filter(
                        Condition::any()
                            .add(ComparisonColumn::Document1Id.eq(id))
                            .add(ComparisonColumn::Document2Id.eq(id)),
                    )
                    .into_tuple()
                    .all(&txn)
                    .await?;

                if !dependents.is_empty() {
                    ExportEntity::delete_many()
                        .filter(ExportColumn::ComparisonId.is_in(dependents.clone()))
                        .exec(&txn)
                        .await?;
                    ComparisonEntity::delete_many()
                        .filter(ComparisonColumn::Id.is_in(dependents.clone()))
                        .exec(&txn)
                        .await?;
                }

                let dequeued = QueueItemEntity::delete_many()
                    .filter(QueueItemColumn::DocumentId.eq(id))
                    .exec(&txn)
                    .await?
                    .rows_affected;

                let removed = DocumentEntity::delete_many()
                    .filter(DocumentColumn::Id.eq(id))
                    .exec(&txn)
                    .await?
                    .rows_affected
                    > 0;

                txn.commit().await?;
                (dependents.len(), dequeued, removed)
            }
            Backend::Memory(_) => self.delete_in_memory(id).await?,
        };

        if removed {
            info!(
                document_id = id,
                comparisons,
                queue_items = dequeued,
                "Document deleted"
            );
        }
        Ok(removed)
    }

    async fn delete_in_memory(&self, id: i32) -> Result<(usize, u64, bool)> {
        let backend = self.inner.backend().clone();
        let comparisons: Repository<ComparisonCodec> = Repository::new(backend.clone());
        let exports: Repository<ExportCodec> = Repository::new(backend.clone());
        let queue: Repository<QueueItemCodec> = Repository::new(backend);

        let mut dependents = comparisons
            .find_by_fields(&Filter::new().eq("document1_id", id))
            .await?;
        dependents.extend(
            comparisons
                .find_by_fields(&Filter::new().eq("document2_id", id))
                .await?,
        );

        for comparison in &dependents {
            exports
                .delete_where(&Filter::new().eq("comparison_id", comparison.id))
                .await?;
            comparisons.delete(comparison.id).await?;
        }

        let dequeued = queue
            .delete_where(&Filter::new().eq("document_id", id))
            .await?;

        let removed = self.inner.delete(id).await?;
        Ok((dependents.len(), dequeued, removed))
    }
}
