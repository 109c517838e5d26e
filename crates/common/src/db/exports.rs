//! Rendered exports of completed comparisons

use crate::db::codec::RowCodec;
use crate::db::comparisons::{ComparisonCodec, ComparisonStatus};
use crate::db::filter::Filter;
use crate::db::memory::{lock, MemTable, MemoryStore};
use crate::db::models::{ExportActiveModel, ExportColumn, ExportEntity, ExportRow};
use crate::db::{Backend, Repository};
use crate::errors::{AppError, Result};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::info;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportType {
    Pdf,
    Docx,
}

impl ExportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportType::Pdf => "pdf",
            ExportType::Docx => "docx",
        }
    }
}

impl fmt::Display for ExportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportType {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pdf" => Ok(ExportType::Pdf),
            "docx" => Ok(ExportType::Docx),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Export {
    pub id: i32,
    pub comparison_id: i32,
    pub export_type: ExportType,
    pub export_url: String,
    pub user_id: String,
    pub download_count: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Validate)]
pub struct NewExport {
    #[validate(range(min = 1))]
    pub comparison_id: i32,
    pub export_type: ExportType,
    #[validate(length(min = 1))]
    pub export_url: String,
    #[validate(length(min = 1))]
    pub user_id: String,
}

/// Re-rendering replaces the stored file; the download counter is not patchable
#[derive(Debug, Clone, Default)]
pub struct ExportPatch {
    pub export_url: Option<String>,
}

pub struct ExportCodec;

impl RowCodec for ExportCodec {
    type Table = ExportEntity;
    type Row = ExportRow;
    type ActiveRow = ExportActiveModel;
    type Record = Export;
    type NewRecord = NewExport;
    type Patch = ExportPatch;

    const RESOURCE: &'static str = "export";

    fn id_column() -> ExportColumn {
        ExportColumn::Id
    }

    fn id(row: &ExportRow) -> i32 {
        row.id
    }

    fn set_id(row: &mut ExportRow, id: i32) {
        row.id = id;
    }

    fn encode(input: NewExport, now: DateTime<Utc>) -> Result<ExportRow> {
        input.validate()?;

        Ok(ExportRow {
            id: 0,
            comparison_id: input.comparison_id,
            export_type: input.export_type.as_str().to_string(),
            export_url: input.export_url,
            user_id: input.user_id,
            download_count: 0,
            created_at: now,
        })
    }

    fn decode(row: &ExportRow) -> Result<Export> {
        let export_type = row.export_type.parse().map_err(|_| AppError::Internal {
            message: format!("export {} has unknown type '{}'", row.id, row.export_type),
        })?;

        Ok(Export {
            id: row.id,
            comparison_id: row.comparison_id,
            export_type,
            export_url: row.export_url.clone(),
            user_id: row.user_id.clone(),
            download_count: row.download_count,
            created_at: row.created_at,
        })
    }

    fn apply(row: &mut ExportRow, patch: ExportPatch, _now: DateTime<Utc>) -> Result<()> {
        if let Some(url) = patch.export_url {
            row.export_url = url;
        }
        Ok(())
    }

    fn memory(store: &MemoryStore) -> &Mutex<MemTable<ExportRow>> {
        &store.exports
    }
}

#[derive(Clone)]
pub struct ExportRepository {
    inner: Repository<ExportCodec>,
    comparisons: Repository<ComparisonCodec>,
}

impl ExportRepository {
    pub fn new(backend: Backend) -> Self {
        Self {
            inner: Repository::new(backend.clone()),
            comparisons: Repository::new(backend),
        }
    }

    pub fn records(&self) -> &Repository<ExportCodec> {
        &self.inner
    }

    /// Register an export of a completed comparison owned by the same user
    pub async fn create(&self, input: NewExport) -> Result<Export> {
        let comparison = match self.comparisons.find_by_id(input.comparison_id).await? {
            Some(c) if c.user_id == input.user_id => c,
            _ => {
                return Err(AppError::not_found(
                    ComparisonCodec::RESOURCE,
                    input.comparison_id,
                ))
            }
        };

        if comparison.status != ComparisonStatus::Completed {
            return Err(AppError::invalid_transition(
                ComparisonCodec::RESOURCE,
                comparison.id,
                comparison.status,
                "exported",
            ));
        }

        let export = self.inner.create(input).await?;
        info!(
            export_id = export.id,
            comparison_id = export.comparison_id,
            export_type = %export.export_type,
            "Export created"
        );
        Ok(export)
    }

    pub async fn find_by_id(&self, id: i32) -> Result<Option<Export>> {
        self.inner.find_by_id(id).await
    }

    pub async fn find_by_comparison(&self, comparison_id: i32) -> Result<Vec<Export>> {
        self.inner
            .find_by_fields(&Filter::new().eq("comparison_id", comparison_id))
            .await
    }

    /// Count one download; the increment happens inside the store
    pub async fn record_download(&self, id: i32) -> Result<Export> {
        match self.inner.backend() {
            Backend::Relational(pool) => {
                let result = ExportEntity::update_many()
                    .col_expr(
                        ExportColumn::DownloadCount,
                        Expr::col(ExportColumn::DownloadCount).add(1),
                    )
                    .filter(ExportColumn::Id.eq(id))
                    .exec(pool.write())
                    .await?;

                if result.rows_affected == 0 {
                    return Err(AppError::not_found(ExportCodec::RESOURCE, id));
                }
            }
            Backend::Memory(store) => {
                let mut table = lock(&store.exports, ExportCodec::RESOURCE)?;
                let row = table
                    .get_mut(id)
                    .ok_or_else(|| AppError::not_found(ExportCodec::RESOURCE, id))?;
                row.download_count += 1;
            }
        }

        self.inner.get(id).await
    }

    pub async fn delete(&self, id: i32) -> Result<bool> {
        self.inner.delete(id).await
    }
}
