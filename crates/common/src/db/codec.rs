//! Row codec
//!
//! Converts flat persisted rows (statuses as text, metadata as JSON text) into
//! typed domain records and back. One codec per table drives the generic
//! repository on either backend.

use crate::db::memory::{MemTable, MemoryStore};
use crate::errors::{AppError, Result};
use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelBehavior, ActiveModelTrait, EntityTrait, FromQueryResult, IntoActiveModel};
use serde::Serialize;
use std::sync::Mutex;

/// Structured document metadata
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Binding between a sea-orm table and its domain record
pub trait RowCodec: Send + Sync + 'static {
    /// sea-orm entity backing the table
    type Table: EntityTrait<Model = Self::Row>;
    /// Persisted row
    type Row: FromQueryResult
        + IntoActiveModel<Self::ActiveRow>
        + Serialize
        + Clone
        + Send
        + Sync
        + 'static;
    type ActiveRow: ActiveModelTrait<Entity = Self::Table> + ActiveModelBehavior + Send + Sync + 'static;
    /// Typed domain entity
    type Record: Clone + Send + Sync + 'static;
    /// Creation input
    type NewRecord: Send;
    /// Partial update
    type Patch: Send;

    /// Resource name used in errors and logs
    const RESOURCE: &'static str;

    fn id_column() -> <Self::Table as EntityTrait>::Column;

    fn id(row: &Self::Row) -> i32;

    fn set_id(row: &mut Self::Row, id: i32);

    /// Validate creation input and build the row to insert (id is assigned by the backend)
    fn encode(input: Self::NewRecord, now: DateTime<Utc>) -> Result<Self::Row>;

    fn decode(row: &Self::Row) -> Result<Self::Record>;

    /// Merge a patch into a row and refresh its modification timestamp
    fn apply(row: &mut Self::Row, patch: Self::Patch, now: DateTime<Utc>) -> Result<()>;

    /// The table's slot in the in-memory store
    fn memory(store: &MemoryStore) -> &Mutex<MemTable<Self::Row>>;

    /// Mirror of the table's unique constraints for the in-memory backend
    fn conflict(_existing: &Self::Row, _candidate: &Self::Row) -> Option<String> {
        None
    }
}

/// Outcome of a create that may resolve to an existing record
#[derive(Debug, Clone, PartialEq)]
pub enum Stored<T> {
    Created(T),
    Existing(T),
}

impl<T> Stored<T> {
    pub fn is_new(&self) -> bool {
        matches!(self, Stored::Created(_))
    }

    pub fn get(&self) -> &T {
        match self {
            Stored::Created(v) | Stored::Existing(v) => v,
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            Stored::Created(v) | Stored::Existing(v) => v,
        }
    }
}

/// Parse a persisted status string into its enum
pub(crate) fn parse_status<S: std::str::FromStr>(resource: &str, id: i32, raw: &str) -> Result<S> {
    raw.parse().map_err(|_| AppError::Internal {
        message: format!("{} {} has unknown status '{}'", resource, id, raw),
    })
}

pub(crate) fn decode_metadata(raw: Option<&str>) -> Result<Option<Metadata>> {
    match raw {
        None => Ok(None),
        Some(text) => match serde_json::from_str::<serde_json::Value>(text)? {
            serde_json::Value::Object(map) => Ok(Some(map)),
            serde_json::Value::Null => Ok(None),
            other => Err(AppError::Internal {
                message: format!("metadata is not a JSON object: {}", other),
            }),
        },
    }
}

pub(crate) fn encode_metadata(metadata: Option<&Metadata>) -> Result<Option<String>> {
    metadata
        .map(serde_json::to_string)
        .transpose()
        .map_err(Into::into)
}
