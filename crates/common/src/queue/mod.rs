//! Processing queue for deferred document work
//!
//! Provides:
//! - Idempotent enqueue (one outstanding item per document and task)
//! - Exclusive claim of the highest-priority, oldest pending item
//! - Completion and retry bookkeeping with a permanent-failure threshold
//!
//! The queue never touches document status. Callers decide what a
//! permanently failed item means for its document.

use crate::db::codec::{parse_status, RowCodec, Stored};
use crate::db::filter::Filter;
use crate::db::memory::{lock, MemTable, MemoryStore};
use crate::db::models::{
    QueueItemActiveModel, QueueItemColumn, QueueItemEntity, QueueItemRow,
};
use crate::db::{Backend, Repository};
use crate::errors::{AppError, Result};
use crate::metrics;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, LockBehavior, LockType, Order, Query};
use sea_orm::{ConnectionTrait, FromQueryResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Kind of deferred work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    ExtractText,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::ExtractText => "extract_text",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "extract_text" => Ok(TaskType::ExtractText),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
        }
    }

    /// Pending or processing
    pub fn is_outstanding(&self) -> bool {
        matches!(self, QueueStatus::Pending | QueueStatus::Processing)
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(QueueStatus::Pending),
            "processing" => Ok(QueueStatus::Processing),
            "completed" => Ok(QueueStatus::Completed),
            "failed" => Ok(QueueStatus::Failed),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: i32,
    pub document_id: i32,
    pub task_type: TaskType,
    pub priority: i32,
    pub status: QueueStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewQueueItem {
    pub document_id: i32,
    pub task_type: TaskType,
    pub priority: i32,
}

#[derive(Debug, Clone, Default)]
pub struct QueueItemPatch {
    pub status: Option<QueueStatus>,
    pub last_error: Option<String>,
}

/// Per-status item counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

impl QueueStats {
    pub fn outstanding(&self) -> u64 {
        self.pending + self.processing
    }
}

pub struct QueueItemCodec;

impl RowCodec for QueueItemCodec {
    type Table = QueueItemEntity;
    type Row = QueueItemRow;
    type ActiveRow = QueueItemActiveModel;
    type Record = QueueItem;
    type NewRecord = NewQueueItem;
    type Patch = QueueItemPatch;

    const RESOURCE: &'static str = "queue_item";

    fn id_column() -> QueueItemColumn {
        QueueItemColumn::Id
    }

    fn id(row: &QueueItemRow) -> i32 {
        row.id
    }

    fn set_id(row: &mut QueueItemRow, id: i32) {
        row.id = id;
    }

    fn encode(input: NewQueueItem, now: DateTime<Utc>) -> Result<QueueItemRow> {
        if input.document_id < 1 {
            return Err(AppError::validation(
                "document_id must be positive",
                Some("document_id"),
            ));
        }

        Ok(QueueItemRow {
            id: 0,
            document_id: input.document_id,
            task_type: input.task_type.as_str().to_string(),
            priority: input.priority,
            status: QueueStatus::Pending.as_str().to_string(),
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        })
    }

    fn decode(row: &QueueItemRow) -> Result<QueueItem> {
        Ok(QueueItem {
            id: row.id,
            document_id: row.document_id,
            task_type: row.task_type.parse().map_err(|_| AppError::Internal {
                message: format!("queue item {} has unknown task type '{}'", row.id, row.task_type),
            })?,
            priority: row.priority,
            status: parse_status(Self::RESOURCE, row.id, &row.status)?,
            attempts: row.attempts,
            last_error: row.last_error.clone(),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    fn apply(row: &mut QueueItemRow, patch: QueueItemPatch, now: DateTime<Utc>) -> Result<()> {
        if let Some(status) = patch.status {
            row.status = status.as_str().to_string();
        }
        if let Some(error) = patch.last_error {
            row.last_error = Some(error);
        }
        row.updated_at = now;
        Ok(())
    }

    fn memory(store: &MemoryStore) -> &Mutex<MemTable<QueueItemRow>> {
        &store.queue
    }

    fn conflict(existing: &QueueItemRow, candidate: &QueueItemRow) -> Option<String> {
        let outstanding = |row: &QueueItemRow| {
            row.status == QueueStatus::Pending.as_str() || row.status == QueueStatus::Processing.as_str()
        };

        (existing.document_id == candidate.document_id
            && existing.task_type == candidate.task_type
            && outstanding(existing)
            && outstanding(candidate))
        .then(|| {
            format!(
                "document {} already has an outstanding {} item",
                candidate.document_id, candidate.task_type
            )
        })
    }
}

/// Queue of document tasks with claim/complete/fail transitions
#[derive(Clone)]
pub struct ProcessingQueue {
    inner: Repository<QueueItemCodec>,
    max_attempts: i32,
}

impl ProcessingQueue {
    /// `max_attempts` claims are allowed before a failing item is parked as
    /// `failed`
    pub fn new(backend: Backend, max_attempts: i32) -> Self {
        Self {
            inner: Repository::new(backend),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> i32 {
        self.max_attempts
    }

    /// Add a pending item unless the document already has an outstanding one
    /// for this task, in which case that item is returned
    pub async fn enqueue(&self, document_id: i32, task_type: TaskType, priority: i32) -> Result<Stored<QueueItem>> {
        if let Some(existing) = self.find_outstanding(document_id, task_type).await? {
            debug!(queue_item_id = existing.id, document_id, "Task already queued");
            return Ok(Stored::Existing(existing));
        }

        let input = NewQueueItem {
            document_id,
            task_type,
            priority,
        };

        match self.inner.create(input).await {
            Ok(item) => {
                info!(
                    queue_item_id = item.id,
                    document_id,
                    task_type = %task_type,
                    priority,
                    "Task enqueued"
                );
                metrics::record_queue_enqueued(task_type.as_str());
                Ok(Stored::Created(item))
            }
            Err(AppError::Duplicate { message }) => match self.find_outstanding(document_id, task_type).await? {
                Some(existing) => Ok(Stored::Existing(existing)),
                None => Err(AppError::Duplicate { message }),
            },
            Err(e) => Err(e),
        }
    }

    /// Atomically take the highest-priority, oldest pending item of this
    /// type, marking it processing and counting the attempt
    pub async fn claim_next(&self, task_type: TaskType) -> Result<Option<QueueItem>> {
        let now = Utc::now();

        let claimed = match self.inner.backend() {
            Backend::Relational(pool) => {
                let next_pending = Query::select()
                    .column(QueueItemColumn::Id)
                    .from(QueueItemEntity)
                    .and_where(Expr::col(QueueItemColumn::Status).eq(QueueStatus::Pending.as_str()))
                    .and_where(Expr::col(QueueItemColumn::TaskType).eq(task_type.as_str()))
                    .order_by(QueueItemColumn::Priority, Order::Desc)
                    .order_by(QueueItemColumn::CreatedAt, Order::Asc)
                    .order_by(QueueItemColumn::Id, Order::Asc)
                    .limit(1)
                    .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
                    .to_owned();

                let claim = Query::update()
                    .table(QueueItemEntity)
                    .value(QueueItemColumn::Status, QueueStatus::Processing.as_str())
                    .value(
                        QueueItemColumn::Attempts,
                        Expr::col(QueueItemColumn::Attempts).add(1),
                    )
                    .value(QueueItemColumn::UpdatedAt, now)
                    .and_where(Expr::col(QueueItemColumn::Id).in_subquery(next_pending))
                    .and_where(Expr::col(QueueItemColumn::Status).eq(QueueStatus::Pending.as_str()))
                    .returning_all()
                    .to_owned();

                let conn = pool.write();
                let stmt = conn.get_database_backend().build(&claim);
                QueueItemRow::find_by_statement(stmt).one(conn).await?
            }
            Backend::Memory(store) => {
                let mut table = lock(&store.queue, QueueItemCodec::RESOURCE)?;

                let candidate = table
                    .iter()
                    .filter(|row| {
                        row.status == QueueStatus::Pending.as_str() && row.task_type == task_type.as_str()
                    })
                    .min_by(|a, b| {
                        b.priority
                            .cmp(&a.priority)
                            .then(a.created_at.cmp(&b.created_at))
                            .then(a.id.cmp(&b.id))
                    })
                    .map(|row| row.id);

                match candidate.and_then(|id| table.get_mut(id)) {
                    Some(row) => {
                        row.status = QueueStatus::Processing.as_str().to_string();
                        row.attempts += 1;
                        row.updated_at = now;
                        Some(row.clone())
                    }
                    None => None,
                }
            }
        };

        let Some(row) = claimed else {
            return Ok(None);
        };

        let item = QueueItemCodec::decode(&row)?;
        debug!(
            queue_item_id = item.id,
            document_id = item.document_id,
            attempt = item.attempts,
            "Task claimed"
        );
        metrics::record_queue_claimed(task_type.as_str());
        Ok(Some(item))
    }

    /// processing -> completed
    pub async fn complete(&self, id: i32) -> Result<QueueItem> {
        let patch = QueueItemPatch {
            status: Some(QueueStatus::Completed),
            ..Default::default()
        };
        let item = self.resolve(id, QueueStatus::Completed, patch).await?;

        info!(queue_item_id = id, document_id = item.document_id, "Task completed");
        metrics::record_queue_completed(item.task_type.as_str());
        Ok(item)
    }

    /// processing -> pending while attempts remain, otherwise -> failed.
    /// The returned item tells the caller which one happened.
    pub async fn fail(&self, id: i32, error: &str) -> Result<QueueItem> {
        let current = self.inner.get(id).await?;
        let next = if current.attempts >= self.max_attempts {
            QueueStatus::Failed
        } else {
            QueueStatus::Pending
        };

        let patch = QueueItemPatch {
            status: Some(next),
            last_error: Some(error.to_string()),
        };
        let item = self.resolve(id, next, patch).await?;

        if next == QueueStatus::Failed {
            warn!(
                queue_item_id = id,
                document_id = item.document_id,
                attempts = item.attempts,
                error,
                "Task failed permanently"
            );
            metrics::record_queue_failed(item.task_type.as_str());
        } else {
            warn!(
                queue_item_id = id,
                document_id = item.document_id,
                attempts = item.attempts,
                error,
                "Task failed, will retry"
            );
            metrics::record_queue_retried(item.task_type.as_str());
        }
        Ok(item)
    }

    /// Apply a transition out of `processing`
    async fn resolve(&self, id: i32, next: QueueStatus, patch: QueueItemPatch) -> Result<QueueItem> {
        let guard = Filter::new().eq("status", QueueStatus::Processing.as_str());
        match self.inner.update_if(id, &guard, patch).await? {
            Some(item) => Ok(item),
            None => {
                let current = self.inner.get(id).await?;
                Err(AppError::invalid_transition(
                    QueueItemCodec::RESOURCE,
                    id,
                    current.status,
                    next,
                ))
            }
        }
    }

    pub async fn find_by_id(&self, id: i32) -> Result<Option<QueueItem>> {
        self.inner.find_by_id(id).await
    }

    /// The pending or processing item for this document and task, if any
    pub async fn find_outstanding(&self, document_id: i32, task_type: TaskType) -> Result<Option<QueueItem>> {
        let filter = Filter::new()
            .eq("document_id", document_id)
            .eq("task_type", task_type.as_str());

        Ok(self
            .inner
            .find_by_fields(&filter)
            .await?
            .into_iter()
            .find(|item| item.status.is_outstanding()))
    }

    pub async fn find_by_document(&self, document_id: i32) -> Result<Vec<QueueItem>> {
        self.inner
            .find_by_fields(&Filter::new().eq("document_id", document_id))
            .await
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let count = |status: QueueStatus| {
            let filter = Filter::new().eq("status", status.as_str());
            async move { self.inner.count(&filter).await }
        };

        Ok(QueueStats {
            pending: count(QueueStatus::Pending).await?,
            processing: count(QueueStatus::Processing).await?,
            completed: count(QueueStatus::Completed).await?,
            failed: count(QueueStatus::Failed).await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::documents::{DocumentRepository, NewDocument};
    use crate::testing::{backends, sample_hash};
    use futures::future::join_all;

    async fn documents(backend: &Backend, count: u8) -> Vec<i32> {
        let repo = DocumentRepository::new(backend.clone());
        let mut ids = Vec::new();
        for seed in 1..=count {
            let doc = repo
                .create(NewDocument {
                    filename: format!("{}.txt", seed),
                    original_name: format!("upload-{}.txt", seed),
                    file_hash: sample_hash(seed),
                    s3_url: format!("file:///blobs/{}", seed),
                    file_size: 1,
                    user_id: "u1".to_string(),
                    status: None,
                    is_standard: None,
                    extracted_text: None,
                    metadata: None,
                })
                .await
                .unwrap()
                .into_inner();
            ids.push(doc.id);
        }
        ids
    }

    #[tokio::test]
    async fn test_enqueue_is_idempotent_while_outstanding() {
        for backend in backends().await {
            let docs = documents(&backend, 1).await;
            let queue = ProcessingQueue::new(backend, 3);

            let first = queue.enqueue(docs[0], TaskType::ExtractText, 0).await.unwrap();
            assert!(first.is_new());
            assert_eq!(first.get().status, QueueStatus::Pending);
            assert_eq!(first.get().attempts, 0);

            let again = queue.enqueue(docs[0], TaskType::ExtractText, 5).await.unwrap();
            assert!(!again.is_new());
            assert_eq!(again.get().id, first.get().id);

            queue.claim_next(TaskType::ExtractText).await.unwrap().unwrap();
            let during = queue.enqueue(docs[0], TaskType::ExtractText, 0).await.unwrap();
            assert!(!during.is_new());

            queue.complete(first.get().id).await.unwrap();
            let requeued = queue.enqueue(docs[0], TaskType::ExtractText, 0).await.unwrap();
            assert!(requeued.is_new());
            assert_eq!(queue.find_by_document(docs[0]).await.unwrap().len(), 2);
        }
    }

    #[tokio::test]
    async fn test_claim_order_priority_then_age() {
        for backend in backends().await {
            let docs = documents(&backend, 3).await;
            let queue = ProcessingQueue::new(backend, 3);

            let low = queue.enqueue(docs[0], TaskType::ExtractText, 0).await.unwrap().into_inner();
            let high = queue.enqueue(docs[1], TaskType::ExtractText, 10).await.unwrap().into_inner();
            let low_later = queue.enqueue(docs[2], TaskType::ExtractText, 0).await.unwrap().into_inner();

            let order: Vec<i32> = vec![
                queue.claim_next(TaskType::ExtractText).await.unwrap().unwrap().id,
                queue.claim_next(TaskType::ExtractText).await.unwrap().unwrap().id,
                queue.claim_next(TaskType::ExtractText).await.unwrap().unwrap().id,
            ];
            assert_eq!(order, vec![high.id, low.id, low_later.id]);
            assert!(queue.claim_next(TaskType::ExtractText).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn test_claim_complete_lifecycle() {
        for backend in backends().await {
            let docs = documents(&backend, 1).await;
            let queue = ProcessingQueue::new(backend, 3);
            let item = queue.enqueue(docs[0], TaskType::ExtractText, 0).await.unwrap().into_inner();

            let claimed = queue.claim_next(TaskType::ExtractText).await.unwrap().unwrap();
            assert_eq!(claimed.id, item.id);
            assert_eq!(claimed.status, QueueStatus::Processing);
            assert_eq!(claimed.attempts, 1);

            let done = queue.complete(item.id).await.unwrap();
            assert_eq!(done.status, QueueStatus::Completed);

            let err = queue.complete(item.id).await.unwrap_err();
            assert!(matches!(err, AppError::InvalidTransition { .. }));
            let err = queue.fail(item.id, "late").await.unwrap_err();
            assert!(matches!(err, AppError::InvalidTransition { .. }));
        }
    }

    #[tokio::test]
    async fn test_complete_requires_claim() {
        for backend in backends().await {
            let docs = documents(&backend, 1).await;
            let queue = ProcessingQueue::new(backend, 3);
            let item = queue.enqueue(docs[0], TaskType::ExtractText, 0).await.unwrap().into_inner();
            let err = queue.complete(item.id).await.unwrap_err();
            assert!(matches!(err, AppError::InvalidTransition { .. }));
            assert!(queue.complete(999).await.unwrap_err().is_not_found());
        }
    }

    #[tokio::test]
    async fn test_fail_retries_until_max_attempts() {
        for backend in backends().await {
            let docs = documents(&backend, 1).await;
            let queue = ProcessingQueue::new(backend, 2);
            let item = queue.enqueue(docs[0], TaskType::ExtractText, 0).await.unwrap().into_inner();

            queue.claim_next(TaskType::ExtractText).await.unwrap().unwrap();
            let retry = queue.fail(item.id, "corrupt stream").await.unwrap();
            assert_eq!(retry.status, QueueStatus::Pending);
            assert_eq!(retry.last_error.as_deref(), Some("corrupt stream"));

            let second = queue.claim_next(TaskType::ExtractText).await.unwrap().unwrap();
            assert_eq!(second.attempts, 2);
            let parked = queue.fail(item.id, "still corrupt").await.unwrap();
            assert_eq!(parked.status, QueueStatus::Failed);
            assert_eq!(parked.last_error.as_deref(), Some("still corrupt"));

            assert!(queue.claim_next(TaskType::ExtractText).await.unwrap().is_none());
            assert!(queue.find_outstanding(docs[0], TaskType::ExtractText).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn test_stats_counts_each_status() {
        for backend in backends().await {
            let docs = documents(&backend, 3).await;
            let queue = ProcessingQueue::new(backend, 1);
            for id in &docs {
                queue.enqueue(*id, TaskType::ExtractText, 0).await.unwrap();
            }
            let a = queue.claim_next(TaskType::ExtractText).await.unwrap().unwrap();
            queue.complete(a.id).await.unwrap();
            let b = queue.claim_next(TaskType::ExtractText).await.unwrap().unwrap();
            queue.fail(b.id, "boom").await.unwrap();

            let stats = queue.stats().await.unwrap();
            assert_eq!(
                stats,
                QueueStats {
                    pending: 1,
                    processing: 0,
                    completed: 1,
                    failed: 1,
                }
            );
            assert_eq!(stats.outstanding(), 1);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_are_exclusive() {
        for backend in backends().await {
            let docs = documents(&backend, 1).await;
            let queue = ProcessingQueue::new(backend, 3);
            queue.enqueue(docs[0], TaskType::ExtractText, 0).await.unwrap();

            let attempts = (0..8).map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.claim_next(TaskType::ExtractText).await })
            });

            let winners = join_all(attempts)
                .await
                .into_iter()
                .map(|joined| joined.unwrap().unwrap())
                .filter(Option::is_some)
                .count();

            assert_eq!(winners, 1);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_enqueue_keeps_one_outstanding() {
        for backend in backends().await {
            let docs = documents(&backend, 1).await;
            let queue = ProcessingQueue::new(backend, 3);

            let calls = (0..6).map(|_| {
                let queue = queue.clone();
                let document_id = docs[0];
                tokio::spawn(async move { queue.enqueue(document_id, TaskType::ExtractText, 0).await })
            });
            let results: Vec<_> = join_all(calls)
                .await
                .into_iter()
                .map(|joined| joined.unwrap().unwrap())
                .collect();

            assert_eq!(results.iter().filter(|r| r.is_new()).count(), 1);
            assert_eq!(queue.find_by_document(docs[0]).await.unwrap().len(), 1);
        }
    }

    #[test]
    fn test_outstanding_conflict_ignores_resolved_items() {
        let now = Utc::now();
        let row = |status: QueueStatus| QueueItemRow {
            id: 1,
            document_id: 7,
            task_type: "extract_text".into(),
            priority: 0,
            status: status.as_str().into(),
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        assert!(QueueItemCodec::conflict(&row(QueueStatus::Processing), &row(QueueStatus::Pending)).is_some());
        assert!(QueueItemCodec::conflict(&row(QueueStatus::Completed), &row(QueueStatus::Pending)).is_none());
        assert!(QueueItemCodec::conflict(&row(QueueStatus::Failed), &row(QueueStatus::Pending)).is_none());
    }
}
