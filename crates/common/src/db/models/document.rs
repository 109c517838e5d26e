//! Document entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "documents")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(column_type = "Text")]
    pub filename: String,

    #[sea_orm(column_type = "Text")]
    pub original_name: String,

    /// SHA-256 of the file content, hex encoded
    #[sea_orm(column_type = "Text", unique)]
    pub file_hash: String,

    /// Opaque blob storage pointer
    #[sea_orm(column_type = "Text")]
    pub s3_url: String,

    pub file_size: i64,

    #[sea_orm(column_type = "Text", indexed)]
    pub user_id: String,

    #[sea_orm(column_type = "Text")]
    pub status: String,

    pub is_standard: bool,

    #[sea_orm(column_type = "Text", nullable)]
    pub extracted_text: Option<String>,

    /// JSON object stored as text
    #[sea_orm(column_type = "Text", nullable)]
    pub metadata: Option<String>,

    pub created_at: DateTimeUtc,

    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::queue_item::Entity")]
    QueueItems,
}

impl Related<super::queue_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::QueueItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
