//! Deal Outcome: terminal confirmation of the sales-deal pipeline.
//!
//! A deal is decided exactly once, as won (with its final value) or lost
//! (with a reason). The decision is stored as stage data of the terminal
//! stage it completed; `reset_outcome` undoes it by reverting to the stage
//! the deal was at when it was decided.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use stagewise_core::TerminalKind;
use stagewise_storage::{EntityRecord, PipelineStorage};
use time::OffsetDateTime;

use crate::engine::{completion, completion_at, Engine};
use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DealOutcome {
    Won,
    Lost,
}

impl DealOutcome {
    fn terminal_kind(self) -> TerminalKind {
        match self {
            DealOutcome::Won => TerminalKind::Won,
            DealOutcome::Lost => TerminalKind::Lost,
        }
    }

    fn reason(self) -> &'static str {
        match self {
            DealOutcome::Won => "deal-won",
            DealOutcome::Lost => "deal-lost",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub outcome: DealOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_value: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub decided_at: OffsetDateTime,
    /// Where `reset_outcome` sends the deal back to.
    pub pre_terminal_stage: String,
}

impl<S: PipelineStorage> Engine<S> {
    pub async fn confirm_won(
        &self,
        entity_id: &str,
        final_value: Decimal,
    ) -> Result<EntityRecord, EngineError> {
        self.decide(entity_id, DealOutcome::Won, Some(final_value), None, None)
            .await
    }

    pub async fn confirm_lost(
        &self,
        entity_id: &str,
        reason: &str,
        details: &str,
    ) -> Result<EntityRecord, EngineError> {
        self.decide(
            entity_id,
            DealOutcome::Lost,
            None,
            Some(reason.to_string()),
            Some(details.to_string()),
        )
        .await
    }

    pub async fn outcome(&self, entity_id: &str) -> Result<Option<OutcomeRecord>, EngineError> {
        let entity = self.storage().get_entity(entity_id).await?;
        self.find_outcome(&entity).await
    }

    /// Undo a recorded decision, returning the deal to its pre-terminal stage.
    pub async fn reset_outcome(&self, entity_id: &str) -> Result<EntityRecord, EngineError> {
        let _guard = self.lock_entity(entity_id).await;
        let entity = self.storage().get_entity(entity_id).await?;
        let Some(outcome) = self.find_outcome(&entity).await? else {
            return Err(EngineError::invalid(entity_id, "deal has no recorded outcome"));
        };
        let entity = self
            .revert_locked(entity_id, &outcome.pre_terminal_stage, "outcome-reset")
            .await?;
        tracing::info!(
            entity_id,
            outcome = ?outcome.outcome,
            stage_id = %entity.current_stage_id,
            "deal outcome reset"
        );
        Ok(entity)
    }

    async fn decide(
        &self,
        entity_id: &str,
        outcome: DealOutcome,
        final_value: Option<Decimal>,
        reason: Option<String>,
        details: Option<String>,
    ) -> Result<EntityRecord, EngineError> {
        let _guard = self.lock_entity(entity_id).await;
        let now = self.now();
        let entity = self.storage().get_entity(entity_id).await?;
        let workflow = entity.workflow_type;
        let kind = outcome.terminal_kind();
        let Some(terminal) = self
            .catalog()
            .terminal_stages(workflow)
            .find(|s| s.terminal == Some(kind))
        else {
            return Err(EngineError::invalid(
                entity_id,
                format!("workflow {workflow} has no {:?} outcome", outcome),
            ));
        };

        let completions = self.storage().list_completions(entity_id).await?;
        let decided = self
            .catalog()
            .terminal_stages(workflow)
            .find(|s| completion_at(&completions, s.order).is_some_and(|c| !c.is_skipped));
        if let Some(stage) = decided {
            return Err(EngineError::AlreadyDecided {
                entity_id: entity_id.to_string(),
                stage_id: stage.id.clone(),
            });
        }

        let current = self.catalog().stage(workflow, &entity.current_stage_id)?;
        // A deal already parked on a terminal stage (by a branch or by sync)
        // is decided from the last stage it actually worked through.
        let pre_terminal = if current.is_terminal() {
            let worked = completions
                .iter()
                .filter(|c| !c.is_skipped && c.order < current.order)
                .filter_map(|c| self.catalog().stage_at(workflow, c.order))
                .filter(|s| !s.is_terminal())
                .max_by_key(|s| s.order);
            match worked {
                Some(stage) => stage,
                None => self
                    .catalog()
                    .stages_for(workflow)
                    .iter()
                    .rev()
                    .find(|s| !s.is_terminal() && s.order < current.order)
                    .unwrap_or(current),
            }
        } else {
            current
        };

        let why = outcome.reason();
        if !current.is_terminal() && completion_at(&completions, current.order).is_none() {
            self.storage()
                .upsert_completion(entity_id, completion(current, now, false, false, why))
                .await?;
        }
        self.skip_range(
            entity_id,
            workflow,
            current.order,
            terminal.order,
            &completions,
            why,
            now,
        )
        .await?;
        self.storage()
            .upsert_completion(entity_id, completion(terminal, now, false, false, why))
            .await?;
        self.skip_alternative_terminals(entity_id, workflow, &terminal.id, now)
            .await?;

        let record = OutcomeRecord {
            outcome,
            final_value,
            reason,
            details,
            decided_at: now,
            pre_terminal_stage: pre_terminal.id.clone(),
        };
        let data = serde_json::to_value(&record).map_err(|e| EngineError::Corrupt {
            entity_id: entity_id.to_string(),
            message: format!("encode outcome: {e}"),
        })?;
        self.storage()
            .put_stage_data(entity_id, &terminal.id, data.clone())
            .await?;
        let entity = self.commit(entity, &terminal.id, now).await?;

        tracing::info!(
            entity_id,
            outcome = ?outcome,
            from = %current.id,
            to = %terminal.id,
            "deal decided"
        );
        self.finish_tracking(
            &entity,
            json!({
                "stage_id": terminal.id,
                "terminal": kind,
                "from": current.id,
                "outcome": data,
            }),
            now,
        );
        Ok(entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::ErrorKind;
    use crate::sink::RecordingSink;
    use stagewise_core::{Catalog, WorkflowType};
    use stagewise_storage::MemoryStorage;
    use std::str::FromStr;
    use std::sync::Arc;
    use time::macros::datetime;

    fn engine() -> Engine<MemoryStorage> {
        Engine::new(
            Arc::new(Catalog::builtin()),
            Arc::new(MemoryStorage::new()),
            Arc::new(RecordingSink::new()),
        )
        .with_clock(Arc::new(ManualClock::new(datetime!(2026-03-02 09:00 UTC))))
    }

    async fn deal_at_negotiation(engine: &Engine<MemoryStorage>) {
        engine.create("deal-1", WorkflowType::SalesDeal).await.unwrap();
        for stage in ["qualification", "needs-analysis", "quote-prep", "quote-sent"] {
            engine.advance("deal-1", stage, "ok").await.unwrap();
        }
    }

    #[tokio::test]
    async fn won_records_value_and_skips_lost() {
        let engine = engine();
        deal_at_negotiation(&engine).await;
        let value = Decimal::from_str("12500.00").unwrap();
        let deal = engine.confirm_won("deal-1", value).await.unwrap();
        assert_eq!(deal.current_stage_id, "closed-won");

        let outcome = engine.outcome("deal-1").await.unwrap().unwrap();
        assert_eq!(outcome.outcome, DealOutcome::Won);
        assert_eq!(outcome.final_value, Some(value));
        assert_eq!(outcome.pre_terminal_stage, "negotiation");

        let completions = engine.storage().list_completions("deal-1").await.unwrap();
        let lost = completions.iter().find(|c| c.stage_id == "closed-lost").unwrap();
        assert!(lost.is_skipped);
        assert_eq!(engine.progress("deal-1").await.unwrap().percent, 100);
    }

    #[tokio::test]
    async fn second_decision_of_either_kind_is_already_decided() {
        let engine = engine();
        deal_at_negotiation(&engine).await;
        engine
            .confirm_won("deal-1", Decimal::new(100, 0))
            .await
            .unwrap();
        let err = engine
            .confirm_lost("deal-1", "competitor", "late")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AlreadyDecided { .. }));
        let err = engine
            .confirm_won("deal-1", Decimal::new(5, 0))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn reset_returns_to_pre_terminal_stage() {
        let engine = engine();
        deal_at_negotiation(&engine).await;
        engine
            .confirm_lost("deal-1", "budget", "frozen until Q3")
            .await
            .unwrap();
        let deal = engine.reset_outcome("deal-1").await.unwrap();
        assert_eq!(deal.current_stage_id, "negotiation");
        assert!(engine.outcome("deal-1").await.unwrap().is_none());

        let completions = engine.storage().list_completions("deal-1").await.unwrap();
        assert_eq!(completions.len(), 4);

        // Decidable again after the reset.
        let deal = engine
            .confirm_won("deal-1", Decimal::new(900, 0))
            .await
            .unwrap();
        assert_eq!(deal.current_stage_id, "closed-won");
    }

    #[tokio::test]
    async fn reset_on_undecided_deal_is_invalid() {
        let engine = engine();
        engine.create("deal-1", WorkflowType::SalesDeal).await.unwrap();
        let err = engine.reset_outcome("deal-1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    }

    #[tokio::test]
    async fn outcome_on_lead_workflow_is_invalid() {
        let engine = engine();
        engine.create("lead-1", WorkflowType::SalesLead).await.unwrap();
        let err = engine
            .confirm_won("lead-1", Decimal::new(1, 0))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    }

    #[tokio::test]
    async fn deal_parked_on_won_by_sync_can_be_confirmed() {
        let engine = engine();
        engine.create("deal-1", WorkflowType::SalesDeal).await.unwrap();
        let deal = engine.record_auto_sync("deal-1", "Closed Won").await.unwrap();
        assert_eq!(deal.current_stage_id, "closed-won");
        assert!(engine.outcome("deal-1").await.unwrap().is_none());

        engine
            .confirm_won("deal-1", Decimal::new(42, 0))
            .await
            .unwrap();
        let outcome = engine.outcome("deal-1").await.unwrap().unwrap();
        assert_eq!(outcome.pre_terminal_stage, "negotiation");
    }

    #[tokio::test]
    async fn deal_branched_to_terminal_resets_to_the_stage_it_left() {
        let engine = engine();
        engine.create("deal-1", WorkflowType::SalesDeal).await.unwrap();
        engine
            .branch_to("deal-1", "qualification", "closed-lost", "disqualified")
            .await
            .unwrap();
        engine
            .confirm_won("deal-1", Decimal::new(7, 0))
            .await
            .unwrap();
        let outcome = engine.outcome("deal-1").await.unwrap().unwrap();
        assert_eq!(outcome.pre_terminal_stage, "qualification");

        let deal = engine.reset_outcome("deal-1").await.unwrap();
        assert_eq!(deal.current_stage_id, "qualification");
    }
}
