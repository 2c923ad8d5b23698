//! Decision trigger: resolve a decision stage by one of its options.

use std::sync::Arc;

use serde_json::json;
use stagewise_core::{DecisionOption, DecisionTarget};
use stagewise_storage::PipelineStorage;

use super::TriggerOutcome;
use crate::engine::{ensure_current, Engine};
use crate::error::EngineError;

pub struct DecisionTrigger<S: PipelineStorage> {
    engine: Arc<Engine<S>>,
}

impl<S: PipelineStorage> DecisionTrigger<S> {
    pub fn new(engine: Arc<Engine<S>>) -> Self {
        DecisionTrigger { engine }
    }

    /// Options of the entity's active stage; empty when it is not a
    /// decision stage.
    pub async fn options(&self, entity_id: &str) -> Result<Vec<DecisionOption>, EngineError> {
        let entity = self.engine.storage().get_entity(entity_id).await?;
        let stage = self
            .engine
            .catalog()
            .stage(entity.workflow_type, &entity.current_stage_id)?;
        Ok(stage.decision_options.clone())
    }

    /// Apply the option labelled `label` of the observed stage. Once the
    /// transition is committed the choice is kept as the stage's data.
    pub async fn choose(
        &self,
        entity_id: &str,
        observed_stage_id: &str,
        label: &str,
    ) -> Result<TriggerOutcome, EngineError> {
        let engine = &self.engine;
        let _guard = engine.lock_entity(entity_id).await;
        let entity = engine.storage().get_entity(entity_id).await?;
        ensure_current(&entity, observed_stage_id)?;
        let stage = engine.catalog().stage(entity.workflow_type, observed_stage_id)?;
        let option = stage
            .decision_option(label)
            .ok_or_else(|| EngineError::UnknownDecision {
                stage_id: stage.id.clone(),
                label: label.to_string(),
            })?;

        let reason = format!("decision: {}", option.label);
        let entity = match &option.target {
            DecisionTarget::Next => {
                engine
                    .advance_locked(entity_id, &stage.id, &reason, false)
                    .await?
            }
            DecisionTarget::Stage(target) => {
                engine
                    .branch_locked(entity_id, &stage.id, target, &reason)
                    .await?
            }
        };
        // Only a decision that took effect is recorded.
        engine
            .storage()
            .put_stage_data(entity_id, &stage.id, json!({ "choice": option.label }))
            .await?;
        Ok(TriggerOutcome::Advanced(entity))
    }
}
