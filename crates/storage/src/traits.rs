use async_trait::async_trait;
use stagewise_core::WorkflowType;

use crate::error::StorageError;
use crate::record::{ArtifactRecord, ChecklistRecord, CompletionRecord, EntityRecord};

/// The persistence collaborator of the pipeline engine.
///
/// A `PipelineStorage` implementation is a plain record store: every method
/// is expected to be atomic on its own, but the engine never assumes a
/// transaction spanning several calls. It compensates with idempotent
/// completion writes and per-entity serialization on its side.
///
/// ## OCC Conflict Detection
///
/// `update_entity` performs an optimistic concurrency check: the write only
/// lands if the stored version still equals `expected_version`. Otherwise
/// it returns `Err(StorageError::ConcurrentConflict { .. })`.
///
/// ## Child records
///
/// Completions, checklist items, stage data and artifacts belong to an
/// entity. Every method touching them returns
/// `Err(StorageError::EntityNotFound)` when the entity does not exist.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` to be shared between
/// axum handlers and the scheduler's background task.
#[async_trait]
pub trait PipelineStorage: Send + Sync + 'static {
    // ── Entities ─────────────────────────────────────────────────────────────

    /// Start tracking a new entity. The stored version is forced to 0.
    ///
    /// Returns `Err(StorageError::AlreadyExists)` if the id is taken.
    async fn create_entity(&self, record: EntityRecord) -> Result<(), StorageError>;

    /// Read an entity.
    ///
    /// Returns `Err(StorageError::EntityNotFound)` if it does not exist.
    async fn get_entity(&self, entity_id: &str) -> Result<EntityRecord, StorageError>;

    /// List tracked entities, optionally restricted to one workflow type,
    /// ordered by entity id.
    async fn list_entities(
        &self,
        workflow: Option<WorkflowType>,
    ) -> Result<Vec<EntityRecord>, StorageError>;

    /// Replace an entity's stored fields if its version is still
    /// `expected_version`. Returns the new version (`expected_version + 1`).
    async fn update_entity(
        &self,
        record: &EntityRecord,
        expected_version: i64,
    ) -> Result<i64, StorageError>;

    // ── Completions ──────────────────────────────────────────────────────────

    /// All completion records of an entity, ordered by stage order.
    async fn list_completions(&self, entity_id: &str)
        -> Result<Vec<CompletionRecord>, StorageError>;

    /// Insert or replace the completion record of `record.stage_id`.
    async fn upsert_completion(
        &self,
        entity_id: &str,
        record: CompletionRecord,
    ) -> Result<(), StorageError>;

    /// Delete every completion whose order is `>= order`. Returns how many
    /// records were removed.
    async fn delete_completions_from(&self, entity_id: &str, order: u32)
        -> Result<usize, StorageError>;

    // ── Checklists ───────────────────────────────────────────────────────────

    /// Insert or replace one checklist item state.
    async fn set_checklist_item(
        &self,
        entity_id: &str,
        record: ChecklistRecord,
    ) -> Result<(), StorageError>;

    /// All checklist item states of an entity, ordered by (stage, item).
    async fn list_checklist(&self, entity_id: &str) -> Result<Vec<ChecklistRecord>, StorageError>;

    // ── Stage data ───────────────────────────────────────────────────────────

    /// Store a free-form JSON blob for one stage, replacing any previous one.
    async fn put_stage_data(
        &self,
        entity_id: &str,
        stage_id: &str,
        data: serde_json::Value,
    ) -> Result<(), StorageError>;

    async fn get_stage_data(
        &self,
        entity_id: &str,
        stage_id: &str,
    ) -> Result<Option<serde_json::Value>, StorageError>;

    /// Returns whether a blob was present.
    async fn delete_stage_data(&self, entity_id: &str, stage_id: &str)
        -> Result<bool, StorageError>;

    // ── Artifacts ────────────────────────────────────────────────────────────

    /// Store artifact metadata, replacing whatever occupied the slot.
    async fn put_artifact(&self, entity_id: &str, record: ArtifactRecord)
        -> Result<(), StorageError>;

    async fn get_artifact(
        &self,
        entity_id: &str,
        slot: &str,
    ) -> Result<Option<ArtifactRecord>, StorageError>;

    /// Remove and return the artifact in `slot`, if any.
    async fn delete_artifact(
        &self,
        entity_id: &str,
        slot: &str,
    ) -> Result<Option<ArtifactRecord>, StorageError>;

    /// All artifacts of an entity, ordered by slot.
    async fn list_artifacts(&self, entity_id: &str) -> Result<Vec<ArtifactRecord>, StorageError>;
}
