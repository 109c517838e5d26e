//! SeaORM entity models
//!
//! Persisted row shapes for Redline: flat columns, statuses as text,
//! structured metadata as JSON text.

pub(crate) mod document;
pub(crate) mod comparison;
pub(crate) mod export;
pub(crate) mod queue_item;

pub use document::{
    Entity as DocumentEntity,
    Model as DocumentRow,
    ActiveModel as DocumentActiveModel,
    Column as DocumentColumn,
};

pub use comparison::{
    Entity as ComparisonEntity,
    Model as ComparisonRow,
    ActiveModel as ComparisonActiveModel,
    Column as ComparisonColumn,
};

pub use export::{
    Entity as ExportEntity,
    Model as ExportRow,
    ActiveModel as ExportActiveModel,
    Column as ExportColumn,
};

pub use queue_item::{
    Entity as QueueItemEntity,
    Model as QueueItemRow,
    ActiveModel as QueueItemActiveModel,
    Column as QueueItemColumn,
};
