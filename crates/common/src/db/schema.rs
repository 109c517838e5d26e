//! Schema bootstrap
//!
//! Creates tables and indexes if they do not exist. Running this against a
//! store without DDL rights fails, which is how `auto` backend selection
//! detects that the relational store is not usable.

use crate::db::models::{
    ComparisonColumn, ComparisonEntity, DocumentEntity, ExportEntity, QueueItemEntity,
};
use sea_orm::sea_query::Index;
use sea_orm::{ConnectionTrait, DbErr, EntityTrait, Schema};
use tracing::debug;

/// Outstanding queue items are unique per (document, task)
const OUTSTANDING_QUEUE_INDEX: &str = "CREATE UNIQUE INDEX IF NOT EXISTS uq_processing_queue_outstanding \
     ON processing_queue (document_id, task_type) \
     WHERE status IN ('pending', 'processing')";

/// At most one standard document per user
const STANDARD_DOCUMENT_INDEX: &str = "CREATE UNIQUE INDEX IF NOT EXISTS uq_documents_standard \
     ON documents (user_id) \
     WHERE is_standard";

pub async fn ensure_schema<C: ConnectionTrait>(conn: &C) -> Result<(), DbErr> {
    let backend = conn.get_database_backend();
    let schema = Schema::new(backend);

    create_table(conn, &schema, DocumentEntity).await?;
    create_table(conn, &schema, ComparisonEntity).await?;
    create_table(conn, &schema, ExportEntity).await?;
    create_table(conn, &schema, QueueItemEntity).await?;

    let pair_index = Index::create()
        .name("uq_comparisons_document_pair")
        .table(ComparisonEntity)
        .col(ComparisonColumn::Document1Id)
        .col(ComparisonColumn::Document2Id)
        .unique()
        .if_not_exists()
        .to_owned();
    conn.execute(backend.build(&pair_index)).await?;

    conn.execute_unprepared(OUTSTANDING_QUEUE_INDEX).await?;
    conn.execute_unprepared(STANDARD_DOCUMENT_INDEX).await?;

    debug!("Schema bootstrap complete");
    Ok(())
}

async fn create_table<C, E>(conn: &C, schema: &Schema, entity: E) -> Result<(), DbErr>
where
    C: ConnectionTrait,
    E: EntityTrait + Copy,
{
    let backend = conn.get_database_backend();

    let mut table = schema.create_table_from_entity(entity);
    table.if_not_exists();
    conn.execute(backend.build(&table)).await?;

    for mut index in schema.create_index_from_entity(entity) {
        index.if_not_exists();
        conn.execute(backend.build(&index)).await?;
    }

    Ok(())
}
