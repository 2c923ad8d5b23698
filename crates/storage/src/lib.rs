//! Persistence seam of the pipeline engine.
//!
//! Defines the [`PipelineStorage`] trait, the record types it stores, an
//! in-memory backend, and a conformance suite every backend should pass.

pub mod conformance;
mod error;
mod memory;
mod record;
mod traits;

pub use error::StorageError;
pub use memory::MemoryStorage;
pub use record::{ArtifactRecord, ChecklistRecord, CompletionRecord, EntityRecord};
pub use traits::PipelineStorage;
