//! Export entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "exports")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub comparison_id: i32,

    /// "pdf" or "docx"
    #[sea_orm(column_type = "Text")]
    pub export_type: String,

    #[sea_orm(column_type = "Text")]
    pub export_url: String,

    #[sea_orm(column_type = "Text")]
    pub user_id: String,

    pub download_count: i32,

    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::comparison::Entity",
        from = "Column::ComparisonId",
        to = "super::comparison::Column::Id",
        on_delete = "Cascade"
    )]
    Comparison,
}

impl Related<super::comparison::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Comparison.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
