//! Manual-confirm trigger.
//!
//! The caller passes the stage it believes is active. The observation is
//! checked against live state under the entity lock, so a confirm issued
//! from a stale view fails with a conflict instead of completing whatever
//! stage the entity has moved on to.

use std::sync::Arc;

use stagewise_core::TriggerKind;
use stagewise_storage::PipelineStorage;

use super::{TriggerOutcome, REASON_MANUAL_CONFIRM};
use crate::engine::{ensure_current, Engine};
use crate::error::EngineError;

pub struct ManualTrigger<S: PipelineStorage> {
    engine: Arc<Engine<S>>,
}

impl<S: PipelineStorage> ManualTrigger<S> {
    pub fn new(engine: Arc<Engine<S>>) -> Self {
        ManualTrigger { engine }
    }

    pub async fn confirm(
        &self,
        entity_id: &str,
        observed_stage_id: &str,
    ) -> Result<TriggerOutcome, EngineError> {
        let engine = &self.engine;
        let _guard = engine.lock_entity(entity_id).await;
        let entity = engine.storage().get_entity(entity_id).await?;
        ensure_current(&entity, observed_stage_id)?;
        let stage = engine.catalog().stage(entity.workflow_type, observed_stage_id)?;

        if stage.is_terminal() {
            let entity = engine.confirm_terminal_locked(entity_id).await?;
            return Ok(TriggerOutcome::Stored(entity));
        }
        if stage.trigger_kind == TriggerKind::Decision {
            return Err(EngineError::invalid(
                entity_id,
                format!("stage '{}' is completed by choosing a decision option", stage.id),
            ));
        }
        let entity = engine
            .advance_locked(entity_id, observed_stage_id, REASON_MANUAL_CONFIRM, false)
            .await?;
        Ok(TriggerOutcome::Advanced(entity))
    }
}
