//! Orchestration over the repositories and external collaborators
//!
//! - `UploadService`: dedup, blob storage, document creation, extraction enqueue
//! - `QueueProcessor`: drains extraction tasks and drives document status
//! - `ComparisonService`: runs a comparison and records its result

pub mod comparison;
pub mod processor;
pub mod upload;

pub use comparison::{ComparisonService, StoredResult};
pub use processor::{DrainReport, QueueProcessor};
pub use upload::UploadService;
