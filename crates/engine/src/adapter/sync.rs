//! External CRM sync trigger.

use std::sync::Arc;

use stagewise_storage::PipelineStorage;
use time::OffsetDateTime;

use super::TriggerOutcome;
use crate::engine::Engine;
use crate::error::EngineError;

pub struct SyncTrigger<S: PipelineStorage> {
    engine: Arc<Engine<S>>,
}

impl<S: PipelineStorage> SyncTrigger<S> {
    pub fn new(engine: Arc<Engine<S>>) -> Self {
        SyncTrigger { engine }
    }

    /// Feed one `(entity, external stage, timestamp)` observation into
    /// [`Engine::record_auto_sync`]. The before/after comparison happens
    /// under the entity lock.
    pub async fn receive(
        &self,
        entity_id: &str,
        external_stage_name: &str,
        observed_at: OffsetDateTime,
    ) -> Result<TriggerOutcome, EngineError> {
        let engine = &self.engine;
        let _guard = engine.lock_entity(entity_id).await;
        let before = engine.storage().get_entity(entity_id).await?;
        let entity = engine
            .record_auto_sync_locked(entity_id, external_stage_name)
            .await?;
        tracing::info!(
            entity_id,
            external_stage = external_stage_name,
            observed_at = %observed_at,
            from = %before.current_stage_id,
            to = %entity.current_stage_id,
            "external sync received"
        );
        if entity.version == before.version {
            Ok(TriggerOutcome::Stored(entity))
        } else {
            Ok(TriggerOutcome::Advanced(entity))
        }
    }
}
