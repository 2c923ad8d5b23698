//! File-upload trigger.
//!
//! An upload to the slot of the currently active stage completes that
//! stage. Uploads to a slot whose stage is already behind (or still ahead)
//! are stored without a transition. Deleting an artifact sends the entity
//! back to the stage that requires it, unless that stage was skipped.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use stagewise_storage::{ArtifactRecord, PipelineStorage};

use super::{TriggerOutcome, REASON_FILE_DELETED, REASON_FILE_UPLOADED};
use crate::engine::{completion_at, Engine};
use crate::error::EngineError;

pub struct UploadTrigger<S: PipelineStorage> {
    engine: Arc<Engine<S>>,
}

impl<S: PipelineStorage> UploadTrigger<S> {
    pub fn new(engine: Arc<Engine<S>>) -> Self {
        UploadTrigger { engine }
    }

    /// Store an uploaded file's metadata and advance if its slot belongs to
    /// the active stage.
    pub async fn uploaded(
        &self,
        entity_id: &str,
        slot: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<(TriggerOutcome, ArtifactRecord), EngineError> {
        let engine = &self.engine;
        let _guard = engine.lock_entity(entity_id).await;
        let entity = engine.storage().get_entity(entity_id).await?;
        let owner = engine.catalog().slot_owner(entity.workflow_type, slot)?;

        let record = ArtifactRecord {
            slot: slot.to_string(),
            file_name: file_name.to_string(),
            size_bytes: bytes.len() as u64,
            sha256: sha256_hex(bytes),
            uploaded_at: engine.now(),
        };
        engine
            .storage()
            .put_artifact(entity_id, record.clone())
            .await?;
        tracing::info!(
            entity_id,
            slot,
            file_name,
            size_bytes = record.size_bytes,
            "artifact stored"
        );

        if owner.id != entity.current_stage_id {
            return Ok((TriggerOutcome::Stored(entity), record));
        }
        let entity = engine
            .advance_locked(entity_id, &owner.id, REASON_FILE_UPLOADED, false)
            .await?;
        Ok((TriggerOutcome::Advanced(entity), record))
    }

    /// Remove an artifact and revert to the stage that requires it, unless
    /// that stage is still ahead of the entity or was skipped.
    pub async fn deleted(&self, entity_id: &str, slot: &str) -> Result<TriggerOutcome, EngineError> {
        let engine = &self.engine;
        let _guard = engine.lock_entity(entity_id).await;
        let entity = engine.storage().get_entity(entity_id).await?;
        let workflow = entity.workflow_type;
        let owner = engine.catalog().slot_owner(workflow, slot)?;

        if engine.storage().delete_artifact(entity_id, slot).await?.is_none() {
            return Err(EngineError::MissingArtifact {
                entity_id: entity_id.to_string(),
                slot: slot.to_string(),
            });
        }
        tracing::info!(entity_id, slot, "artifact deleted");

        let current = engine.catalog().stage(workflow, &entity.current_stage_id)?;
        if owner.order > current.order {
            return Ok(TriggerOutcome::Stored(entity));
        }
        // A skipped stage never required the file.
        let completions = engine.storage().list_completions(entity_id).await?;
        if completion_at(&completions, owner.order).is_some_and(|c| c.is_skipped) {
            tracing::debug!(entity_id, slot, stage_id = %owner.id, "owning stage was skipped; no revert");
            return Ok(TriggerOutcome::Stored(entity));
        }
        let entity = engine
            .revert_locked(entity_id, &owner.id, REASON_FILE_DELETED)
            .await?;
        Ok(TriggerOutcome::Reverted(entity))
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let hash_bytes = hasher.finalize();
    hash_bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
