//! Generic repository
//!
//! Backend-agnostic CRUD over one table, driven by its `RowCodec`. Every
//! operation dispatches on the injected `Backend`: the relational path goes
//! through sea-orm, the in-memory path through a single lock acquisition on
//! the table.

use crate::db::codec::RowCodec;
use crate::db::filter::{FieldValue, Filter};
use crate::db::memory::lock;
use crate::db::Backend;
use crate::errors::{AppError, Result};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue, ColumnTrait, ConnectionTrait, EntityTrait, FromQueryResult,
    IntoActiveModel, Iterable, JsonValue, PaginatorTrait, QueryFilter, QueryOrder, Statement,
};
use std::marker::PhantomData;
use tracing::debug;

/// CRUD engine for the table described by codec `C`
pub struct Repository<C: RowCodec> {
    backend: Backend,
    _codec: PhantomData<fn() -> C>,
}

impl<C: RowCodec> Clone for Repository<C> {
    fn clone(&self) -> Self {
        Self::new(self.backend.clone())
    }
}

impl<C: RowCodec> Repository<C> {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            _codec: PhantomData,
        }
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Insert a new record; the backend assigns its id
    pub async fn create(&self, input: C::NewRecord) -> Result<C::Record> {
        let row = C::encode(input, Utc::now())?;

        let inserted = match &self.backend {
            Backend::Relational(pool) => insert_row::<C, _>(pool.write(), row).await?,
            Backend::Memory(store) => {
                let mut table = lock(C::memory(store), C::RESOURCE)?;
                let mut row = row;

                if let Some(message) = table.iter().find_map(|existing| C::conflict(existing, &row)) {
                    return Err(AppError::Duplicate { message });
                }

                let id = table.allocate_id();
                C::set_id(&mut row, id);
                table.insert(id, row.clone());
                row
            }
        };

        debug!(resource = C::RESOURCE, id = C::id(&inserted), "Record created");
        C::decode(&inserted)
    }

    /// Single lookup; absence is not an error
    pub async fn find_by_id(&self, id: i32) -> Result<Option<C::Record>> {
        let row = match &self.backend {
            Backend::Relational(pool) => {
                C::Table::find()
                    .filter(C::id_column().eq(id))
                    .one(pool.read())
                    .await?
            }
            Backend::Memory(store) => lock(C::memory(store), C::RESOURCE)?.get(id).cloned(),
        };

        row.as_ref().map(C::decode).transpose()
    }

    /// Like `find_by_id`, but absence is `NotFound`
    pub async fn get(&self, id: i32) -> Result<C::Record> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::not_found(C::RESOURCE, id))
    }

    /// Merge `patch` into the record; fails `NotFound` if it does not exist
    pub async fn update(&self, id: i32, patch: C::Patch) -> Result<C::Record> {
        self.update_if(id, &Filter::new(), patch)
            .await?
            .ok_or_else(|| AppError::not_found(C::RESOURCE, id))
    }

    /// Compare-and-set update: the patch is applied only while the row still
    /// matches `guard`. Returns `None` when the guard does not hold, `NotFound`
    /// when the row does not exist.
    pub async fn update_if(&self, id: i32, guard: &Filter, patch: C::Patch) -> Result<Option<C::Record>> {
        let now = Utc::now();

        let updated = match &self.backend {
            Backend::Relational(pool) => {
                let conn = pool.write();
                let current = C::Table::find()
                    .filter(C::id_column().eq(id))
                    .one(conn)
                    .await?
                    .ok_or_else(|| AppError::not_found(C::RESOURCE, id))?;

                if !guard.matches(&current)? {
                    return Ok(None);
                }

                let mut next = current.clone();
                C::apply(&mut next, patch, now)?;

                let Some(changes) = changed_columns::<C>(&current, &next) else {
                    return C::decode(&current).map(Some);
                };

                let result = C::Table::update_many()
                    .set(changes)
                    .filter(C::id_column().eq(id))
                    .filter(guard.to_condition::<C::Table>()?)
                    .exec(conn)
                    .await?;

                if result.rows_affected == 0 {
                    debug!(resource = C::RESOURCE, id, "Conditional update lost the race");
                    return Ok(None);
                }

                next
            }
            Backend::Memory(store) => {
                let mut table = lock(C::memory(store), C::RESOURCE)?;
                let current = table
                    .get(id)
                    .ok_or_else(|| AppError::not_found(C::RESOURCE, id))?;

                if !guard.matches(current)? {
                    return Ok(None);
                }

                let mut next = current.clone();
                C::apply(&mut next, patch, now)?;

                // Same unique constraints the relational schema enforces on UPDATE
                if let Some(message) = table
                    .iter()
                    .filter(|other| C::id(other) != id)
                    .find_map(|other| C::conflict(other, &next))
                {
                    return Err(AppError::Duplicate { message });
                }

                table.insert(id, next.clone());
                next
            }
        };

        debug!(resource = C::RESOURCE, id, "Record updated");
        C::decode(&updated).map(Some)
    }

    /// Remove a record; repeated deletes return `false`
    pub async fn delete(&self, id: i32) -> Result<bool> {
        let removed = match &self.backend {
            Backend::Relational(pool) => {
                C::Table::delete_many()
                    .filter(C::id_column().eq(id))
                    .exec(pool.write())
                    .await?
                    .rows_affected
                    > 0
            }
            Backend::Memory(store) => lock(C::memory(store), C::RESOURCE)?.remove(id).is_some(),
        };

        if removed {
            debug!(resource = C::RESOURCE, id, "Record deleted");
        }
        Ok(removed)
    }

    /// Remove every record matching `filter`; returns how many were removed
    pub async fn delete_where(&self, filter: &Filter) -> Result<u64> {
        match &self.backend {
            Backend::Relational(pool) => Ok(C::Table::delete_many()
                .filter(filter.to_condition::<C::Table>()?)
                .exec(pool.write())
                .await?
                .rows_affected),
            Backend::Memory(store) => {
                let mut table = lock(C::memory(store), C::RESOURCE)?;
                let mut doomed = Vec::new();
                for row in table.iter() {
                    if filter.matches(row)? {
                        doomed.push(C::id(row));
                    }
                }
                for id in &doomed {
                    table.remove(*id);
                }
                Ok(doomed.len() as u64)
            }
        }
    }

    /// First record (lowest id) whose `field` equals `value`
    pub async fn find_by_field(&self, field: &str, value: impl Into<FieldValue>) -> Result<Option<C::Record>> {
        let filter = Filter::new().eq(field, value);
        Ok(self.find_by_fields(&filter).await?.into_iter().next())
    }

    /// All records matching `filter`, in ascending id order
    pub async fn find_by_fields(&self, filter: &Filter) -> Result<Vec<C::Record>> {
        let rows = match &self.backend {
            Backend::Relational(pool) => {
                C::Table::find()
                    .filter(filter.to_condition::<C::Table>()?)
                    .order_by_asc(C::id_column())
                    .all(pool.read())
                    .await?
            }
            Backend::Memory(store) => {
                let table = lock(C::memory(store), C::RESOURCE)?;
                let mut rows = Vec::new();
                for row in table.iter() {
                    if filter.matches(row)? {
                        rows.push(row.clone());
                    }
                }
                rows
            }
        };

        rows.iter().map(C::decode).collect()
    }

    pub async fn count(&self, filter: &Filter) -> Result<u64> {
        match &self.backend {
            Backend::Relational(pool) => Ok(C::Table::find()
                .filter(filter.to_condition::<C::Table>()?)
                .count(pool.read())
                .await?),
            Backend::Memory(store) => {
                let table = lock(C::memory(store), C::RESOURCE)?;
                let mut count = 0;
                for row in table.iter() {
                    if filter.matches(row)? {
                        count += 1;
                    }
                }
                Ok(count)
            }
        }
    }

    /// Raw SQL escape hatch, relational backend only. Rows come back as JSON
    /// objects keyed by column name.
    pub async fn execute_custom_query(
        &self,
        sql: &str,
        params: Vec<sea_orm::Value>,
    ) -> Result<Vec<JsonValue>> {
        match &self.backend {
            Backend::Relational(pool) => {
                let conn = pool.write();
                let stmt = Statement::from_sql_and_values(conn.get_database_backend(), sql, params);
                Ok(JsonValue::find_by_statement(stmt).all(conn).await?)
            }
            Backend::Memory(_) => Err(AppError::Unsupported {
                operation: "execute_custom_query".to_string(),
                backend: self.backend.name().to_string(),
            }),
        }
    }
}

/// Insert a row through any connection (pool or transaction), letting the
/// database assign the id
pub(crate) async fn insert_row<C, Conn>(conn: &Conn, row: C::Row) -> Result<C::Row>
where
    C: RowCodec,
    Conn: ConnectionTrait,
{
    let mut active: C::ActiveRow = row.into_active_model().reset_all();
    active.not_set(C::id_column());
    Ok(active.insert(conn).await?)
}

/// Active model holding only the columns that differ between two rows
pub(crate) fn changed_columns<C: RowCodec>(current: &C::Row, next: &C::Row) -> Option<C::ActiveRow> {
    let before: C::ActiveRow = current.clone().into_active_model();
    let after: C::ActiveRow = next.clone().into_active_model();
    let mut changes = <C::ActiveRow as ActiveModelTrait>::default();
    let mut changed = false;

    for column in <<C::Table as EntityTrait>::Column as Iterable>::iter() {
        let old = before.get(column).into_value();
        if let ActiveValue::Set(new) | ActiveValue::Unchanged(new) = after.get(column) {
            if old.as_ref() != Some(&new) {
                changes.set(column, new);
                changed = true;
            }
        }
    }

    changed.then_some(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::documents::{DocumentCodec, DocumentPatch, DocumentStatus, NewDocument};
    use crate::testing::{backends, sample_hash};

    fn new_doc(user: &str, seed: u8) -> NewDocument {
        NewDocument {
            filename: format!("{}.txt", seed),
            original_name: format!("Report {}.txt", seed),
            file_hash: sample_hash(seed),
            s3_url: format!("file:///blobs/{}", seed),
            file_size: 100 + seed as i64,
            user_id: user.to_string(),
            status: None,
            is_standard: None,
            extracted_text: None,
            metadata: None,
        }
    }

    #[tokio::test]
    async fn test_create_assigns_monotonic_ids() {
        for backend in backends().await {
            let repo: Repository<DocumentCodec> = Repository::new(backend);
            let a = repo.create(new_doc("u1", 1)).await.unwrap();
            let b = repo.create(new_doc("u1", 2)).await.unwrap();
            assert!(b.id > a.id);
            assert_eq!(repo.get(a.id).await.unwrap().file_hash, sample_hash(1));
        }
    }

    #[tokio::test]
    async fn test_find_missing_is_absent_not_error() {
        for backend in backends().await {
            let repo: Repository<DocumentCodec> = Repository::new(backend);
            assert!(repo.find_by_id(999).await.unwrap().is_none());
            assert!(repo.get(999).await.unwrap_err().is_not_found());
        }
    }

    #[tokio::test]
    async fn test_update_merges_and_touches_timestamp() {
        for backend in backends().await {
            let repo: Repository<DocumentCodec> = Repository::new(backend);
            let doc = repo.create(new_doc("u1", 1)).await.unwrap();

            let patch = DocumentPatch {
                status: Some(DocumentStatus::Processing),
                ..Default::default()
            };
            let updated = repo.update(doc.id, patch).await.unwrap();
            assert_eq!(updated.status, DocumentStatus::Processing);
            assert_eq!(updated.filename, doc.filename);
            assert!(updated.updated_at >= doc.updated_at);

            let reread = repo.get(doc.id).await.unwrap();
            assert_eq!(reread.status, DocumentStatus::Processing);
        }
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        for backend in backends().await {
            let repo: Repository<DocumentCodec> = Repository::new(backend);
            let err = repo.update(42, DocumentPatch::default()).await.unwrap_err();
            assert!(err.is_not_found());
        }
    }

    #[tokio::test]
    async fn test_update_if_respects_guard() {
        for backend in backends().await {
            let repo: Repository<DocumentCodec> = Repository::new(backend);
            let doc = repo.create(new_doc("u1", 1)).await.unwrap();

            let guard = Filter::new().eq("status", "processing");
            let patch = DocumentPatch {
                status: Some(DocumentStatus::Processed),
                ..Default::default()
            };
            assert!(repo.update_if(doc.id, &guard, patch).await.unwrap().is_none());
            assert_eq!(repo.get(doc.id).await.unwrap().status, DocumentStatus::Uploaded);
        }
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        for backend in backends().await {
            let repo: Repository<DocumentCodec> = Repository::new(backend);
            let doc = repo.create(new_doc("u1", 1)).await.unwrap();
            assert!(repo.delete(doc.id).await.unwrap());
            assert!(!repo.delete(doc.id).await.unwrap());
            assert!(repo.find_by_id(doc.id).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn test_filters_select_same_rows_on_both_backends() {
        let mut results = Vec::new();

        for backend in backends().await {
            let repo: Repository<DocumentCodec> = Repository::new(backend);
            for (user, seed) in [("u1", 1), ("u2", 2), ("u1", 3), ("u1", 4)] {
                repo.create(new_doc(user, seed)).await.unwrap();
            }
            repo.update(
                2,
                DocumentPatch {
                    status: Some(DocumentStatus::Processing),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

            let filter = Filter::new().eq("user_id", "u1").eq("status", "uploaded");
            let hashes: Vec<_> = repo
                .find_by_fields(&filter)
                .await
                .unwrap()
                .into_iter()
                .map(|d| d.file_hash)
                .collect();
            let count = repo.count(&filter).await.unwrap();
            let untexted = repo
                .count(&Filter::new().eq("extracted_text", FieldValue::Null))
                .await
                .unwrap();
            results.push((hashes, count, untexted));
        }

        assert_eq!(results[0], results[1]);
        assert_eq!(results[0].1, 2);
        assert_eq!(results[0].2, 4);
    }

    #[tokio::test]
    async fn test_find_by_field_returns_lowest_id() {
        for backend in backends().await {
            let repo: Repository<DocumentCodec> = Repository::new(backend);
            let first = repo.create(new_doc("u9", 1)).await.unwrap();
            repo.create(new_doc("u9", 2)).await.unwrap();
            let found = repo.find_by_field("user_id", "u9").await.unwrap().unwrap();
            assert_eq!(found.id, first.id);
            assert!(repo.find_by_field("user_id", "nobody").await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn test_delete_where_counts_removed_rows() {
        for backend in backends().await {
            let repo: Repository<DocumentCodec> = Repository::new(backend);
            repo.create(new_doc("u1", 1)).await.unwrap();
            repo.create(new_doc("u1", 2)).await.unwrap();
            repo.create(new_doc("u2", 3)).await.unwrap();
            let removed = repo.delete_where(&Filter::new().eq("user_id", "u1")).await.unwrap();
            assert_eq!(removed, 2);
            assert_eq!(repo.count(&Filter::new()).await.unwrap(), 1);
        }
    }

    #[tokio::test]
    async fn test_custom_query_is_relational_only() {
        let memory: Repository<DocumentCodec> = Repository::new(Backend::memory());
        let err = memory.execute_custom_query("SELECT 1", vec![]).await.unwrap_err();
        assert!(matches!(err, AppError::Unsupported { .. }));

        let sqlite: Repository<DocumentCodec> = Repository::new(crate::testing::sqlite_backend().await);
        sqlite.create(new_doc("u1", 1)).await.unwrap();
        let rows = sqlite
            .execute_custom_query(
                "SELECT user_id, file_size FROM documents WHERE user_id = ?",
                vec!["u1".into()],
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["user_id"], "u1");
    }
}
