//! Comparison entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "comparisons")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub document1_id: i32,

    pub document2_id: i32,

    #[sea_orm(column_type = "Text", nullable)]
    pub comparison_result_url: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub comparison_summary: Option<String>,

    #[sea_orm(column_type = "Text", indexed)]
    pub user_id: String,

    #[sea_orm(column_type = "Text")]
    pub status: String,

    pub created_at: DateTimeUtc,

    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::document::Entity",
        from = "Column::Document1Id",
        to = "super::document::Column::Id",
        on_delete = "Cascade"
    )]
    Document1,

    #[sea_orm(
        belongs_to = "super::document::Entity",
        from = "Column::Document2Id",
        to = "super::document::Column::Id",
        on_delete = "Cascade"
    )]
    Document2,

    #[sea_orm(has_many = "super::export::Entity")]
    Exports,
}

impl Related<super::export::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Exports.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
