//! In-process `PipelineStorage` backend.
//!
//! Everything lives in one `tokio::sync::RwLock`ed map, so each trait call
//! is trivially atomic. Used by the binary (single-node console) and by
//! tests.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use stagewise_core::WorkflowType;
use tokio::sync::RwLock;

use crate::error::StorageError;
use crate::record::{ArtifactRecord, ChecklistRecord, CompletionRecord, EntityRecord};
use crate::traits::PipelineStorage;

#[derive(Debug)]
struct EntitySlot {
    record: EntityRecord,
    /// Keyed by stage order.
    completions: BTreeMap<u32, CompletionRecord>,
    checklist: BTreeMap<(String, String), ChecklistRecord>,
    stage_data: BTreeMap<String, serde_json::Value>,
    artifacts: BTreeMap<String, ArtifactRecord>,
}

impl EntitySlot {
    fn new(record: EntityRecord) -> Self {
        EntitySlot {
            record,
            completions: BTreeMap::new(),
            checklist: BTreeMap::new(),
            stage_data: BTreeMap::new(),
            artifacts: BTreeMap::new(),
        }
    }
}

/// Volatile storage backend; contents are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entities: RwLock<HashMap<String, EntitySlot>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(entity_id: &str) -> StorageError {
    StorageError::EntityNotFound {
        entity_id: entity_id.to_string(),
    }
}

#[async_trait]
impl PipelineStorage for MemoryStorage {
    async fn create_entity(&self, mut record: EntityRecord) -> Result<(), StorageError> {
        let mut entities = self.entities.write().await;
        if entities.contains_key(&record.entity_id) {
            return Err(StorageError::AlreadyExists {
                entity_id: record.entity_id,
            });
        }
        record.version = 0;
        entities.insert(record.entity_id.clone(), EntitySlot::new(record));
        Ok(())
    }

    async fn get_entity(&self, entity_id: &str) -> Result<EntityRecord, StorageError> {
        let entities = self.entities.read().await;
        entities
            .get(entity_id)
            .map(|slot| slot.record.clone())
            .ok_or_else(|| not_found(entity_id))
    }

    async fn list_entities(
        &self,
        workflow: Option<WorkflowType>,
    ) -> Result<Vec<EntityRecord>, StorageError> {
        let entities = self.entities.read().await;
        let mut records: Vec<EntityRecord> = entities
            .values()
            .filter(|slot| workflow.map_or(true, |w| slot.record.workflow_type == w))
            .map(|slot| slot.record.clone())
            .collect();
        records.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        Ok(records)
    }

    async fn update_entity(
        &self,
        record: &EntityRecord,
        expected_version: i64,
    ) -> Result<i64, StorageError> {
        let mut entities = self.entities.write().await;
        let slot = entities
            .get_mut(&record.entity_id)
            .ok_or_else(|| not_found(&record.entity_id))?;
        if slot.record.version != expected_version {
            return Err(StorageError::ConcurrentConflict {
                entity_id: record.entity_id.clone(),
                expected_version,
                actual_version: slot.record.version,
            });
        }
        let new_version = expected_version + 1;
        slot.record = EntityRecord {
            version: new_version,
            // Creation time is immutable.
            created_at: slot.record.created_at,
            ..record.clone()
        };
        Ok(new_version)
    }

    async fn list_completions(
        &self,
        entity_id: &str,
    ) -> Result<Vec<CompletionRecord>, StorageError> {
        let entities = self.entities.read().await;
        let slot = entities.get(entity_id).ok_or_else(|| not_found(entity_id))?;
        Ok(slot.completions.values().cloned().collect())
    }

    async fn upsert_completion(
        &self,
        entity_id: &str,
        record: CompletionRecord,
    ) -> Result<(), StorageError> {
        let mut entities = self.entities.write().await;
        let slot = entities
            .get_mut(entity_id)
            .ok_or_else(|| not_found(entity_id))?;
        slot.completions.insert(record.order, record);
        Ok(())
    }

    async fn delete_completions_from(
        &self,
        entity_id: &str,
        order: u32,
    ) -> Result<usize, StorageError> {
        let mut entities = self.entities.write().await;
        let slot = entities
            .get_mut(entity_id)
            .ok_or_else(|| not_found(entity_id))?;
        let removed = slot.completions.split_off(&order);
        Ok(removed.len())
    }

    async fn set_checklist_item(
        &self,
        entity_id: &str,
        record: ChecklistRecord,
    ) -> Result<(), StorageError> {
        let mut entities = self.entities.write().await;
        let slot = entities
            .get_mut(entity_id)
            .ok_or_else(|| not_found(entity_id))?;
        slot.checklist
            .insert((record.stage_id.clone(), record.item_id.clone()), record);
        Ok(())
    }

    async fn list_checklist(&self, entity_id: &str) -> Result<Vec<ChecklistRecord>, StorageError> {
        let entities = self.entities.read().await;
        let slot = entities.get(entity_id).ok_or_else(|| not_found(entity_id))?;
        Ok(slot.checklist.values().cloned().collect())
    }

    async fn put_stage_data(
        &self,
        entity_id: &str,
        stage_id: &str,
        data: serde_json::Value,
    ) -> Result<(), StorageError> {
        let mut entities = self.entities.write().await;
        let slot = entities
            .get_mut(entity_id)
            .ok_or_else(|| not_found(entity_id))?;
        slot.stage_data.insert(stage_id.to_string(), data);
        Ok(())
    }

    async fn get_stage_data(
        &self,
        entity_id: &str,
        stage_id: &str,
    ) -> Result<Option<serde_json::Value>, StorageError> {
        let entities = self.entities.read().await;
        let slot = entities.get(entity_id).ok_or_else(|| not_found(entity_id))?;
        Ok(slot.stage_data.get(stage_id).cloned())
    }

    async fn delete_stage_data(
        &self,
        entity_id: &str,
        stage_id: &str,
    ) -> Result<bool, StorageError> {
        let mut entities = self.entities.write().await;
        let slot = entities
            .get_mut(entity_id)
            .ok_or_else(|| not_found(entity_id))?;
        Ok(slot.stage_data.remove(stage_id).is_some())
    }

    async fn put_artifact(
        &self,
        entity_id: &str,
        record: ArtifactRecord,
    ) -> Result<(), StorageError> {
        let mut entities = self.entities.write().await;
        let slot = entities
            .get_mut(entity_id)
            .ok_or_else(|| not_found(entity_id))?;
        slot.artifacts.insert(record.slot.clone(), record);
        Ok(())
    }

    async fn get_artifact(
        &self,
        entity_id: &str,
        slot_name: &str,
    ) -> Result<Option<ArtifactRecord>, StorageError> {
        let entities = self.entities.read().await;
        let slot = entities.get(entity_id).ok_or_else(|| not_found(entity_id))?;
        Ok(slot.artifacts.get(slot_name).cloned())
    }

    async fn delete_artifact(
        &self,
        entity_id: &str,
        slot_name: &str,
    ) -> Result<Option<ArtifactRecord>, StorageError> {
        let mut entities = self.entities.write().await;
        let slot = entities
            .get_mut(entity_id)
            .ok_or_else(|| not_found(entity_id))?;
        Ok(slot.artifacts.remove(slot_name))
    }

    async fn list_artifacts(&self, entity_id: &str) -> Result<Vec<ArtifactRecord>, StorageError> {
        let entities = self.entities.read().await;
        let slot = entities.get(entity_id).ok_or_else(|| not_found(entity_id))?;
        Ok(slot.artifacts.values().cloned().collect())
    }
}
