//! Stage Transition Engine.
//!
//! Every state-mutating operation takes the entity's lock, re-reads the
//! entity, validates against the catalog and writes through
//! [`PipelineStorage`]. The public methods acquire the lock; the
//! `*_locked` variants expect the caller to hold it already so adapters
//! and the scheduler can compose several steps under one guard.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use stagewise_core::{Catalog, StageDefinition, TimerKind, WorkflowType};
use stagewise_storage::{
    ArtifactRecord, ChecklistRecord, CompletionRecord, EntityRecord, PipelineStorage,
};
use time::OffsetDateTime;
use tokio::sync::OwnedMutexGuard;

use crate::calendar::BusinessCalendar;
use crate::clock::{Clock, SystemClock};
use crate::error::EngineError;
use crate::locks::EntityLocks;
use crate::notifier::{Notification, Notifier, OUTCOME_CONFIRMED, STAGE_CHANGED};
use crate::outcome::OutcomeRecord;
use crate::progress::{self, Progress};
use crate::scheduler::{AutomationTimer, TimerKey, TimerTable};
use crate::sink::NotificationSink;

/// Reason attached to completions written by `record_auto_sync`.
pub const REASON_EXTERNAL_SYNC: &str = "external-sync";
/// Reason attached to completions written by an auto-advance timer.
pub const REASON_TIMER_ELAPSED: &str = "timer-elapsed";
const REASON_REVERTED: &str = "reverted";
const REASON_TERMINAL_CONFIRMED: &str = "terminal-confirmed";
const REASON_ALTERNATIVE_OUTCOME: &str = "alternative-outcome";

/// Everything known about one entity, for display.
#[derive(Debug, Clone, Serialize)]
pub struct EntitySnapshot {
    pub entity: EntityRecord,
    pub completions: Vec<CompletionRecord>,
    pub checklist: Vec<ChecklistRecord>,
    pub artifacts: Vec<ArtifactRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<OutcomeRecord>,
    pub timers: Vec<AutomationTimer>,
    pub progress: Progress,
}

pub struct Engine<S: PipelineStorage> {
    catalog: Arc<Catalog>,
    storage: Arc<S>,
    clock: Arc<dyn Clock>,
    calendar: BusinessCalendar,
    locks: EntityLocks,
    timers: TimerTable,
    notifier: Notifier,
}

impl<S: PipelineStorage> Engine<S> {
    pub fn new(catalog: Arc<Catalog>, storage: Arc<S>, sink: Arc<dyn NotificationSink>) -> Self {
        Engine {
            catalog,
            storage,
            clock: Arc::new(SystemClock),
            calendar: BusinessCalendar::default(),
            locks: EntityLocks::new(),
            timers: TimerTable::new(),
            notifier: Notifier::new(sink),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_calendar(mut self, calendar: BusinessCalendar) -> Self {
        self.calendar = calendar;
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn timers(&self) -> &TimerTable {
        &self.timers
    }

    pub fn calendar(&self) -> &BusinessCalendar {
        &self.calendar
    }

    pub fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    pub(crate) fn sink(&self) -> &Arc<dyn NotificationSink> {
        self.notifier.sink()
    }

    pub(crate) async fn lock_entity(&self, entity_id: &str) -> OwnedMutexGuard<()> {
        self.locks.lock(entity_id).await
    }

    /// Wait until every background notification published so far has been
    /// delivered (or has failed and been logged).
    pub async fn drain_notifications(&self) {
        self.notifier.drain().await;
    }

    // ──────────────────────────────────────────────
    // Reads
    // ──────────────────────────────────────────────

    pub async fn get(&self, entity_id: &str) -> Result<EntityRecord, EngineError> {
        Ok(self.storage.get_entity(entity_id).await?)
    }

    pub async fn list(&self, workflow: Option<WorkflowType>) -> Result<Vec<EntityRecord>, EngineError> {
        Ok(self.storage.list_entities(workflow).await?)
    }

    pub async fn progress(&self, entity_id: &str) -> Result<Progress, EngineError> {
        let entity = self.storage.get_entity(entity_id).await?;
        let completions = self.storage.list_completions(entity_id).await?;
        Ok(progress::project(&self.catalog, &entity, &completions))
    }

    pub async fn snapshot(&self, entity_id: &str) -> Result<EntitySnapshot, EngineError> {
        let entity = self.storage.get_entity(entity_id).await?;
        let completions = self.storage.list_completions(entity_id).await?;
        let checklist = self.storage.list_checklist(entity_id).await?;
        let artifacts = self.storage.list_artifacts(entity_id).await?;
        let outcome = self.find_outcome(&entity).await?;
        let progress = progress::project(&self.catalog, &entity, &completions);
        Ok(EntitySnapshot {
            timers: self.timers.for_entity(entity_id),
            entity,
            completions,
            checklist,
            artifacts,
            outcome,
            progress,
        })
    }

    // ──────────────────────────────────────────────
    // Lifecycle
    // ──────────────────────────────────────────────

    /// Start tracking an entity at the first stage of its workflow.
    pub async fn create(
        &self,
        entity_id: &str,
        workflow: WorkflowType,
    ) -> Result<EntityRecord, EngineError> {
        let _guard = self.lock_entity(entity_id).await;
        let now = self.now();
        let first = self.catalog.first_stage(workflow);
        let record = EntityRecord {
            entity_id: entity_id.to_string(),
            workflow_type: workflow,
            current_stage_id: first.id.clone(),
            version: 0,
            created_at: now,
            updated_at: now,
        };
        self.storage.create_entity(record).await?;
        let entity = self.storage.get_entity(entity_id).await?;
        self.enter_stage(&entity, first, now);
        tracing::info!(entity_id, workflow = %workflow, stage_id = %first.id, "entity created");
        Ok(entity)
    }

    // ──────────────────────────────────────────────
    // Transitions
    // ──────────────────────────────────────────────

    /// Complete `from_stage_id` and move to the next stage.
    ///
    /// `from_stage_id` must be the entity's current stage, otherwise the
    /// call fails with a conflict and nothing changes.
    pub async fn advance(
        &self,
        entity_id: &str,
        from_stage_id: &str,
        reason: &str,
    ) -> Result<EntityRecord, EngineError> {
        let _guard = self.lock_entity(entity_id).await;
        self.advance_locked(entity_id, from_stage_id, reason, false)
            .await
    }

    pub(crate) async fn advance_locked(
        &self,
        entity_id: &str,
        from_stage_id: &str,
        reason: &str,
        auto_synced: bool,
    ) -> Result<EntityRecord, EngineError> {
        let now = self.now();
        let entity = self.storage.get_entity(entity_id).await?;
        ensure_current(&entity, from_stage_id)?;
        let workflow = entity.workflow_type;
        let from = self.catalog.stage(workflow, from_stage_id)?;
        if from.is_terminal() {
            return Err(EngineError::invalid(
                entity_id,
                format!("stage '{}' is terminal; confirm the outcome instead", from.id),
            ));
        }
        // External truth overrides local gates.
        if !auto_synced {
            self.check_gate(entity_id, from).await?;
        }

        let completions = self.storage.list_completions(entity_id).await?;
        if completion_at(&completions, from.order).is_none() {
            self.storage
                .upsert_completion(
                    entity_id,
                    completion(from, now, false, auto_synced, reason),
                )
                .await?;
        }
        let to = self.next_unskipped(entity_id, workflow, from, &completions)?;
        let entity = self.commit(entity, &to.id, now).await?;

        tracing::info!(
            entity_id,
            from = %from.id,
            to = %to.id,
            reason,
            auto_synced,
            "stage advanced"
        );
        self.after_transition(&entity, &from.id, reason, now);
        Ok(entity)
    }

    /// Move back to `to_stage_id`, dropping every completion at or after it.
    pub async fn revert(
        &self,
        entity_id: &str,
        to_stage_id: &str,
    ) -> Result<EntityRecord, EngineError> {
        let _guard = self.lock_entity(entity_id).await;
        self.revert_locked(entity_id, to_stage_id, REASON_REVERTED)
            .await
    }

    pub(crate) async fn revert_locked(
        &self,
        entity_id: &str,
        to_stage_id: &str,
        reason: &str,
    ) -> Result<EntityRecord, EngineError> {
        let now = self.now();
        let entity = self.storage.get_entity(entity_id).await?;
        let workflow = entity.workflow_type;
        let target = self.catalog.stage(workflow, to_stage_id)?;
        let current = self.catalog.stage(workflow, &entity.current_stage_id)?;
        if target.order > current.order {
            return Err(EngineError::invalid(
                entity_id,
                format!(
                    "cannot revert forward from '{}' to '{}'",
                    current.id, target.id
                ),
            ));
        }

        let removed = self
            .storage
            .delete_completions_from(entity_id, target.order)
            .await?;
        let stale_data: Vec<String> = self.catalog.stages_for(workflow)[target.order as usize..]
            .iter()
            .map(|s| s.id.clone())
            .collect();
        for stage_id in &stale_data {
            self.storage.delete_stage_data(entity_id, stage_id).await?;
        }
        let entity = self.commit(entity, &target.id, now).await?;

        tracing::info!(
            entity_id,
            from = %current.id,
            to = %target.id,
            removed_completions = removed,
            reason,
            "stage reverted"
        );
        self.after_transition(&entity, &current.id, reason, now);
        if target.id == current.id {
            // Reverting onto the current stage restarts its automations.
            self.enter_stage(&entity, target, now);
        }
        Ok(entity)
    }

    /// Mark a stage completed-but-skipped.
    ///
    /// Skipping the current stage moves the entity on; skipping a future
    /// stage only records the skip so a later `advance` passes over it.
    pub async fn skip(
        &self,
        entity_id: &str,
        stage_id: &str,
        reason: &str,
    ) -> Result<EntityRecord, EngineError> {
        let _guard = self.lock_entity(entity_id).await;
        let now = self.now();
        let entity = self.storage.get_entity(entity_id).await?;
        let workflow = entity.workflow_type;
        let stage = self.catalog.stage(workflow, stage_id)?;
        let current = self.catalog.stage(workflow, &entity.current_stage_id)?;
        if stage.is_terminal() {
            return Err(EngineError::invalid(
                entity_id,
                format!("terminal stage '{}' cannot be skipped", stage.id),
            ));
        }
        let completions = self.storage.list_completions(entity_id).await?;
        if completion_at(&completions, stage.order).is_some() {
            return Err(EngineError::invalid(
                entity_id,
                format!("stage '{}' is already completed", stage.id),
            ));
        }
        if stage.order < current.order {
            return Err(EngineError::invalid(
                entity_id,
                format!("stage '{}' lies behind the current stage", stage.id),
            ));
        }

        self.storage
            .upsert_completion(entity_id, completion(stage, now, true, false, reason))
            .await?;

        if stage.id != current.id {
            tracing::info!(entity_id, stage_id, reason, "future stage skipped");
            return self.touch(entity, now).await;
        }
        let to = self.next_unskipped(entity_id, workflow, stage, &completions)?;
        let entity = self.commit(entity, &to.id, now).await?;
        tracing::info!(entity_id, from = %stage.id, to = %to.id, reason, "stage skipped");
        self.after_transition(&entity, &stage.id, reason, now);
        Ok(entity)
    }

    /// Complete `from_stage_id` and jump to `target_stage_id`, skipping
    /// every stage strictly between them.
    pub async fn branch_to(
        &self,
        entity_id: &str,
        from_stage_id: &str,
        target_stage_id: &str,
        reason: &str,
    ) -> Result<EntityRecord, EngineError> {
        let _guard = self.lock_entity(entity_id).await;
        self.branch_locked(entity_id, from_stage_id, target_stage_id, reason)
            .await
    }

    pub(crate) async fn branch_locked(
        &self,
        entity_id: &str,
        from_stage_id: &str,
        target_stage_id: &str,
        reason: &str,
    ) -> Result<EntityRecord, EngineError> {
        let now = self.now();
        let entity = self.storage.get_entity(entity_id).await?;
        ensure_current(&entity, from_stage_id)?;
        let workflow = entity.workflow_type;
        let from = self.catalog.stage(workflow, from_stage_id)?;
        let target = self.catalog.stage(workflow, target_stage_id)?;
        if from.is_terminal() {
            return Err(EngineError::invalid(
                entity_id,
                format!("stage '{}' is terminal", from.id),
            ));
        }
        if target.order <= from.order {
            return Err(EngineError::invalid(
                entity_id,
                format!("branch target '{}' does not lie ahead of '{}'", target.id, from.id),
            ));
        }

        let completions = self.storage.list_completions(entity_id).await?;
        if completion_at(&completions, from.order).is_none() {
            self.storage
                .upsert_completion(entity_id, completion(from, now, false, false, reason))
                .await?;
        }
        let skipped = self
            .skip_range(
                entity_id,
                workflow,
                from.order,
                target.order,
                &completions,
                reason,
                now,
            )
            .await?;
        let entity = self.commit(entity, &target.id, now).await?;

        tracing::info!(
            entity_id,
            from = %from.id,
            to = %target.id,
            skipped,
            reason,
            "stage branched"
        );
        self.after_transition(&entity, &from.id, reason, now);
        Ok(entity)
    }

    /// Record the completion of a completion/rejection terminal stage.
    pub async fn confirm_terminal(&self, entity_id: &str) -> Result<EntityRecord, EngineError> {
        let _guard = self.lock_entity(entity_id).await;
        self.confirm_terminal_locked(entity_id).await
    }

    pub(crate) async fn confirm_terminal_locked(
        &self,
        entity_id: &str,
    ) -> Result<EntityRecord, EngineError> {
        let now = self.now();
        let entity = self.storage.get_entity(entity_id).await?;
        let workflow = entity.workflow_type;
        let stage = self.catalog.stage(workflow, &entity.current_stage_id)?;
        let Some(kind) = stage.terminal else {
            return Err(EngineError::invalid(
                entity_id,
                format!("stage '{}' is not a terminal stage", stage.id),
            ));
        };
        if kind.is_deal_outcome() {
            return Err(EngineError::invalid(
                entity_id,
                "deal outcomes are confirmed as won or lost",
            ));
        }
        let completions = self.storage.list_completions(entity_id).await?;
        if completion_at(&completions, stage.order).is_some() {
            return Err(EngineError::AlreadyDecided {
                entity_id: entity_id.to_string(),
                stage_id: stage.id.clone(),
            });
        }

        self.storage
            .upsert_completion(
                entity_id,
                completion(stage, now, false, false, REASON_TERMINAL_CONFIRMED),
            )
            .await?;
        self.skip_alternative_terminals(entity_id, workflow, &stage.id, now)
            .await?;
        let entity = self.touch(entity, now).await?;

        tracing::info!(entity_id, stage_id = %stage.id, "terminal stage confirmed");
        self.finish_tracking(
            &entity,
            json!({ "stage_id": stage.id, "terminal": kind }),
            now,
        );
        Ok(entity)
    }

    // ──────────────────────────────────────────────
    // Checklists
    // ──────────────────────────────────────────────

    pub async fn set_checklist_item(
        &self,
        entity_id: &str,
        stage_id: &str,
        item_id: &str,
        checked: bool,
    ) -> Result<ChecklistRecord, EngineError> {
        let _guard = self.lock_entity(entity_id).await;
        let now = self.now();
        let entity = self.storage.get_entity(entity_id).await?;
        let stage = self.catalog.stage(entity.workflow_type, stage_id)?;
        if !stage.has_checklist_item(item_id) {
            return Err(EngineError::UnknownChecklistItem {
                stage_id: stage_id.to_string(),
                item_id: item_id.to_string(),
            });
        }
        let completions = self.storage.list_completions(entity_id).await?;
        if completion_at(&completions, stage.order).is_some() {
            return Err(EngineError::invalid(
                entity_id,
                format!("checklist of completed stage '{}' is locked", stage.id),
            ));
        }
        let record = ChecklistRecord {
            stage_id: stage_id.to_string(),
            item_id: item_id.to_string(),
            checked,
            updated_at: now,
        };
        self.storage
            .set_checklist_item(entity_id, record.clone())
            .await?;
        tracing::debug!(entity_id, stage_id, item_id, checked, "checklist item updated");
        Ok(record)
    }

    // ──────────────────────────────────────────────
    // External sync
    // ──────────────────────────────────────────────

    /// Catch up with an external system's stage, one advance at a time.
    ///
    /// Never moves backward and never completes a terminal stage.
    pub async fn record_auto_sync(
        &self,
        entity_id: &str,
        external_stage_name: &str,
    ) -> Result<EntityRecord, EngineError> {
        let _guard = self.lock_entity(entity_id).await;
        self.record_auto_sync_locked(entity_id, external_stage_name)
            .await
    }

    pub(crate) async fn record_auto_sync_locked(
        &self,
        entity_id: &str,
        external_stage_name: &str,
    ) -> Result<EntityRecord, EngineError> {
        let mut entity = self.storage.get_entity(entity_id).await?;
        let workflow = entity.workflow_type;
        let target = self.catalog.external_stage(workflow, external_stage_name)?;
        let start = self.catalog.index_of(workflow, &entity.current_stage_id)?;

        loop {
            let current = self.catalog.stage(workflow, &entity.current_stage_id)?;
            if current.order >= target.order || current.is_terminal() {
                break;
            }
            entity = self
                .advance_locked(entity_id, &current.id, REASON_EXTERNAL_SYNC, true)
                .await?;
        }

        if start >= target.order {
            tracing::debug!(
                entity_id,
                external_stage = external_stage_name,
                local_stage = %entity.current_stage_id,
                "external stage not ahead; sync ignored"
            );
        }
        Ok(entity)
    }

    // ──────────────────────────────────────────────
    // Internals
    // ──────────────────────────────────────────────

    /// Write the entity with a new current stage under the version check.
    pub(crate) async fn commit(
        &self,
        mut entity: EntityRecord,
        to_stage_id: &str,
        now: OffsetDateTime,
    ) -> Result<EntityRecord, EngineError> {
        let expected = entity.version;
        entity.current_stage_id = to_stage_id.to_string();
        entity.updated_at = now;
        entity.version = self.storage.update_entity(&entity, expected).await?;
        Ok(entity)
    }

    pub(crate) async fn touch(
        &self,
        entity: EntityRecord,
        now: OffsetDateTime,
    ) -> Result<EntityRecord, EngineError> {
        let stage_id = entity.current_stage_id.clone();
        self.commit(entity, &stage_id, now).await
    }

    /// The stage `advance` lands on: the successor of `from`, passing over
    /// non-terminal stages that already carry a skip record.
    fn next_unskipped(
        &self,
        entity_id: &str,
        workflow: WorkflowType,
        from: &StageDefinition,
        completions: &[CompletionRecord],
    ) -> Result<&StageDefinition, EngineError> {
        let mut next = self.catalog.next_stage(workflow, &from.id)?;
        while let Some(stage) = next {
            let skipped = completion_at(completions, stage.order).is_some_and(|c| c.is_skipped);
            if !skipped || stage.is_terminal() {
                return Ok(stage);
            }
            next = self.catalog.next_stage(workflow, &stage.id)?;
        }
        Err(EngineError::invalid(
            entity_id,
            format!("no stage follows '{}'", from.id),
        ))
    }

    async fn check_gate(&self, entity_id: &str, stage: &StageDefinition) -> Result<(), EngineError> {
        if !stage.checklist_gate {
            return Ok(());
        }
        let checked: HashSet<String> = self
            .storage
            .list_checklist(entity_id)
            .await?
            .into_iter()
            .filter(|c| c.stage_id == stage.id && c.checked)
            .map(|c| c.item_id)
            .collect();
        let missing: Vec<&str> = stage
            .checklist
            .iter()
            .filter(|item| !checked.contains(&item.id))
            .map(|item| item.id.as_str())
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        Err(EngineError::invalid(
            entity_id,
            format!(
                "checklist of stage '{}' is incomplete: {}",
                stage.id,
                missing.join(", ")
            ),
        ))
    }

    /// Record a skip for every stage strictly between two orders that has
    /// no completion yet. Returns how many skips were written.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn skip_range(
        &self,
        entity_id: &str,
        workflow: WorkflowType,
        after: u32,
        before: u32,
        completions: &[CompletionRecord],
        reason: &str,
        now: OffsetDateTime,
    ) -> Result<usize, EngineError> {
        let mut skipped = 0;
        for stage in self.catalog.stages_between(workflow, after, before) {
            if completion_at(completions, stage.order).is_none() {
                self.storage
                    .upsert_completion(entity_id, completion(stage, now, true, false, reason))
                    .await?;
                skipped += 1;
            }
        }
        Ok(skipped)
    }

    /// Mark every other terminal stage without a completion as skipped.
    pub(crate) async fn skip_alternative_terminals(
        &self,
        entity_id: &str,
        workflow: WorkflowType,
        chosen_stage_id: &str,
        now: OffsetDateTime,
    ) -> Result<(), EngineError> {
        let completions = self.storage.list_completions(entity_id).await?;
        let alternatives: Vec<&StageDefinition> = self
            .catalog
            .terminal_stages(workflow)
            .filter(|s| s.id != chosen_stage_id && completion_at(&completions, s.order).is_none())
            .collect();
        for stage in alternatives {
            self.storage
                .upsert_completion(
                    entity_id,
                    completion(stage, now, true, false, REASON_ALTERNATIVE_OUTCOME),
                )
                .await?;
        }
        Ok(())
    }

    /// Arm the automations of `stage` for an entity that just entered it.
    /// Returns how many timers were armed.
    pub(crate) fn enter_stage(
        &self,
        entity: &EntityRecord,
        stage: &StageDefinition,
        since: OffsetDateTime,
    ) -> usize {
        if stage.is_terminal() {
            return 0;
        }
        for rule in &stage.automations {
            let fires_at = self
                .calendar
                .add_business_days(since, rule.delay_business_days);
            let key = TimerKey::new(&entity.entity_id, &stage.id, rule.kind);
            self.timers.arm(key, rule.clone(), since, fires_at);
            tracing::debug!(
                entity_id = %entity.entity_id,
                stage_id = %stage.id,
                kind = %rule.kind,
                fires_at = %fires_at,
                "automation timer armed"
            );
        }
        stage.automations.len()
    }

    /// Timer and notification bookkeeping after the current stage changed.
    fn after_transition(&self, entity: &EntityRecord, from_stage_id: &str, reason: &str, now: OffsetDateTime) {
        self.cancel_timers(
            self.timers
                .cancel_exited(&entity.entity_id, &entity.current_stage_id, now),
        );
        if entity.current_stage_id != from_stage_id {
            if let Ok(stage) = self
                .catalog
                .stage(entity.workflow_type, &entity.current_stage_id)
            {
                self.enter_stage(entity, stage, now);
            }
        }
        self.notifier.publish(Notification::Send {
            entity_id: entity.entity_id.clone(),
            template: STAGE_CHANGED.to_string(),
            payload: json!({
                "workflow": entity.workflow_type,
                "from": from_stage_id,
                "to": entity.current_stage_id,
                "reason": reason,
                "version": entity.version,
            }),
        });
    }

    /// The entity reached a decided terminal stage: drop all of its timers
    /// and announce the outcome.
    pub(crate) fn finish_tracking(
        &self,
        entity: &EntityRecord,
        payload: serde_json::Value,
        now: OffsetDateTime,
    ) {
        self.cancel_timers(self.timers.cancel_all(&entity.entity_id, now));
        self.notifier.publish(Notification::Send {
            entity_id: entity.entity_id.clone(),
            template: OUTCOME_CONFIRMED.to_string(),
            payload,
        });
    }

    fn cancel_timers(&self, cancelled: Vec<AutomationTimer>) {
        for timer in cancelled {
            tracing::debug!(
                entity_id = %timer.key.entity_id,
                stage_id = %timer.key.stage_id,
                kind = %timer.key.kind,
                "automation timer cancelled"
            );
            if timer.key.kind == TimerKind::FollowUp && timer.fired_count > 0 {
                self.publish_unenroll(&timer.key.entity_id);
            }
        }
    }

    pub(crate) fn publish_unenroll(&self, entity_id: &str) {
        self.notifier.publish(Notification::Unenroll {
            entity_id: entity_id.to_string(),
        });
    }

    /// The stored deal outcome of an entity, if any.
    pub(crate) async fn find_outcome(
        &self,
        entity: &EntityRecord,
    ) -> Result<Option<OutcomeRecord>, EngineError> {
        let stage_ids: Vec<String> = self
            .catalog
            .terminal_stages(entity.workflow_type)
            .filter(|s| s.terminal.is_some_and(|k| k.is_deal_outcome()))
            .map(|s| s.id.clone())
            .collect();
        for stage_id in stage_ids {
            let Some(data) = self
                .storage
                .get_stage_data(&entity.entity_id, &stage_id)
                .await?
            else {
                continue;
            };
            let record = serde_json::from_value(data).map_err(|e| EngineError::Corrupt {
                entity_id: entity.entity_id.clone(),
                message: format!("outcome of stage '{stage_id}': {e}"),
            })?;
            return Ok(Some(record));
        }
        Ok(None)
    }
}

pub(crate) fn ensure_current(entity: &EntityRecord, observed_stage_id: &str) -> Result<(), EngineError> {
    if entity.current_stage_id == observed_stage_id {
        return Ok(());
    }
    Err(EngineError::StaleStage {
        entity_id: entity.entity_id.clone(),
        expected: observed_stage_id.to_string(),
        current: entity.current_stage_id.clone(),
    })
}

pub(crate) fn completion_at(completions: &[CompletionRecord], order: u32) -> Option<&CompletionRecord> {
    completions.iter().find(|c| c.order == order)
}

pub(crate) fn completion(
    stage: &StageDefinition,
    now: OffsetDateTime,
    is_skipped: bool,
    is_auto_synced: bool,
    reason: &str,
) -> CompletionRecord {
    CompletionRecord {
        stage_id: stage.id.clone(),
        order: stage.order,
        completed_at: now,
        is_skipped,
        is_auto_synced,
        reason: Some(reason.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::ErrorKind;
    use crate::sink::RecordingSink;
    use stagewise_storage::MemoryStorage;
    use time::macros::datetime;

    const START: OffsetDateTime = datetime!(2026-03-02 09:00 UTC);

    fn engine() -> (Engine<MemoryStorage>, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let engine = Engine::new(
            Arc::new(Catalog::builtin()),
            Arc::new(MemoryStorage::new()),
            sink.clone(),
        )
        .with_clock(Arc::new(ManualClock::new(START)));
        (engine, sink)
    }

    async fn stages(engine: &Engine<MemoryStorage>, id: &str) -> Vec<(String, bool)> {
        engine
            .storage()
            .list_completions(id)
            .await
            .unwrap()
            .into_iter()
            .map(|c| (c.stage_id, c.is_skipped))
            .collect()
    }

    #[tokio::test]
    async fn create_starts_at_first_stage() {
        let (engine, _) = engine();
        let lead = engine.create("lead-1", WorkflowType::SalesLead).await.unwrap();
        assert_eq!(lead.current_stage_id, "new-lead");
        assert_eq!(lead.version, 0);
        assert_eq!(lead.created_at, START);
    }

    #[tokio::test]
    async fn create_twice_is_conflict() {
        let (engine, _) = engine();
        engine.create("lead-1", WorkflowType::SalesLead).await.unwrap();
        let err = engine
            .create("lead-1", WorkflowType::SalesLead)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn advance_records_completion_and_moves_on() {
        let (engine, _) = engine();
        engine.create("lead-1", WorkflowType::SalesLead).await.unwrap();
        let lead = engine.advance("lead-1", "new-lead", "qualified").await.unwrap();
        assert_eq!(lead.current_stage_id, "intro-call");
        assert_eq!(lead.version, 1);

        let completions = engine.storage().list_completions("lead-1").await.unwrap();
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].stage_id, "new-lead");
        assert_eq!(completions[0].reason.as_deref(), Some("qualified"));
        assert!(!completions[0].is_skipped && !completions[0].is_auto_synced);
    }

    #[tokio::test]
    async fn stale_advance_is_conflict_and_changes_nothing() {
        let (engine, _) = engine();
        engine.create("lead-1", WorkflowType::SalesLead).await.unwrap();
        let first = engine.advance("lead-1", "new-lead", "ok").await.unwrap();
        let err = engine.advance("lead-1", "new-lead", "ok").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(engine.get("lead-1").await.unwrap(), first);
    }

    #[tokio::test]
    async fn advance_on_terminal_is_invalid() {
        let (engine, _) = engine();
        engine.create("deal-1", WorkflowType::SalesDeal).await.unwrap();
        engine.branch_to("deal-1", "qualification", "closed-won", "test").await.unwrap();
        let err = engine.advance("deal-1", "closed-won", "again").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    }

    #[tokio::test]
    async fn advance_passes_over_skipped_stages() {
        let (engine, _) = engine();
        engine.create("lead-1", WorkflowType::SalesLead).await.unwrap();
        engine.skip("lead-1", "intro-call", "met at conference").await.unwrap();
        let lead = engine.advance("lead-1", "new-lead", "ok").await.unwrap();
        assert_eq!(lead.current_stage_id, "discovery");
        assert_eq!(
            stages(&engine, "lead-1").await,
            vec![("new-lead".into(), false), ("intro-call".into(), true)]
        );
    }

    #[tokio::test]
    async fn skip_current_stage_moves_on() {
        let (engine, _) = engine();
        engine.create("deal-1", WorkflowType::SalesDeal).await.unwrap();
        let deal = engine.skip("deal-1", "qualification", "inbound").await.unwrap();
        assert_eq!(deal.current_stage_id, "needs-analysis");
    }

    #[tokio::test]
    async fn skip_rejects_terminal_and_completed_stages() {
        let (engine, _) = engine();
        engine.create("deal-1", WorkflowType::SalesDeal).await.unwrap();
        engine.advance("deal-1", "qualification", "ok").await.unwrap();
        let terminal = engine.skip("deal-1", "closed-lost", "x").await.unwrap_err();
        let done = engine.skip("deal-1", "qualification", "x").await.unwrap_err();
        assert_eq!(terminal.kind(), ErrorKind::InvalidTransition);
        assert_eq!(done.kind(), ErrorKind::InvalidTransition);
    }

    #[tokio::test]
    async fn revert_forward_is_invalid() {
        let (engine, _) = engine();
        engine.create("lead-1", WorkflowType::SalesLead).await.unwrap();
        let err = engine.revert("lead-1", "demo").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    }

    #[tokio::test]
    async fn revert_keeps_only_earlier_completions() {
        let (engine, _) = engine();
        engine.create("lead-1", WorkflowType::SalesLead).await.unwrap();
        for stage in ["new-lead", "intro-call", "discovery"] {
            engine.advance("lead-1", stage, "ok").await.unwrap();
        }
        let lead = engine.revert("lead-1", "intro-call").await.unwrap();
        assert_eq!(lead.current_stage_id, "intro-call");
        assert_eq!(stages(&engine, "lead-1").await, vec![("new-lead".into(), false)]);
    }

    #[tokio::test]
    async fn branch_skips_intermediate_stages() {
        let (engine, _) = engine();
        engine.create("lead-1", WorkflowType::SalesLead).await.unwrap();
        for stage in ["new-lead", "intro-call", "discovery", "demo", "readiness"] {
            engine.advance("lead-1", stage, "ok").await.unwrap();
        }
        let lead = engine
            .branch_to("lead-1", "decision", "not-a-fit", "Not a Fit")
            .await
            .unwrap();
        assert_eq!(lead.current_stage_id, "not-a-fit");
        let skipped: Vec<String> = stages(&engine, "lead-1")
            .await
            .into_iter()
            .filter(|(_, s)| *s)
            .map(|(id, _)| id)
            .collect();
        assert_eq!(
            skipped,
            [
                "proposal",
                "proposal-review",
                "contract",
                "crm-handoff",
                "onboarding-form",
                "welcome-sequence",
                "kickoff"
            ]
        );
    }

    #[tokio::test]
    async fn branch_backward_is_invalid() {
        let (engine, _) = engine();
        engine.create("deal-1", WorkflowType::SalesDeal).await.unwrap();
        engine.advance("deal-1", "qualification", "ok").await.unwrap();
        let err = engine
            .branch_to("deal-1", "needs-analysis", "qualification", "x")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    }

    #[tokio::test]
    async fn confirm_terminal_completes_and_rejects_repeat() {
        let (engine, sink) = engine();
        engine.create("cust-1", WorkflowType::Offboarding).await.unwrap();
        engine
            .branch_to("cust-1", "notice-received", "complete", "bulk close")
            .await
            .unwrap();
        engine.confirm_terminal("cust-1").await.unwrap();
        let progress = engine.progress("cust-1").await.unwrap();
        assert_eq!(progress.percent, 100);

        let err = engine.confirm_terminal("cust-1").await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadyDecided { .. }));

        engine.drain_notifications().await;
        assert!(sink.calls().iter().any(|c| matches!(
            c,
            crate::sink::SinkCall::Send { template, .. } if template == OUTCOME_CONFIRMED
        )));
    }

    #[tokio::test]
    async fn confirm_terminal_rejects_deal_outcomes_and_open_stages() {
        let (engine, _) = engine();
        engine.create("deal-1", WorkflowType::SalesDeal).await.unwrap();
        let open = engine.confirm_terminal("deal-1").await.unwrap_err();
        assert_eq!(open.kind(), ErrorKind::InvalidTransition);

        engine.branch_to("deal-1", "qualification", "closed-won", "x").await.unwrap();
        let deal = engine.confirm_terminal("deal-1").await.unwrap_err();
        assert_eq!(deal.kind(), ErrorKind::InvalidTransition);
    }

    #[tokio::test]
    async fn gated_checklist_blocks_local_advance() {
        let (engine, _) = engine();
        engine.create("lead-1", WorkflowType::SalesLead).await.unwrap();
        engine.record_auto_sync("lead-1", "Customer").await.unwrap();
        assert_eq!(engine.get("lead-1").await.unwrap().current_stage_id, "onboarding-form");

        let err = engine
            .advance("lead-1", "onboarding-form", "done")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
        assert!(err.to_string().contains("billing-contact"));

        for item in ["billing-contact", "admin-users", "data-import"] {
            engine
                .set_checklist_item("lead-1", "onboarding-form", item, true)
                .await
                .unwrap();
        }
        let lead = engine.advance("lead-1", "onboarding-form", "done").await.unwrap();
        assert_eq!(lead.current_stage_id, "welcome-sequence");
    }

    #[tokio::test]
    async fn checklist_rules() {
        let (engine, _) = engine();
        engine.create("lead-1", WorkflowType::SalesLead).await.unwrap();
        let unknown = engine
            .set_checklist_item("lead-1", "discovery", "nope", true)
            .await
            .unwrap_err();
        assert_eq!(unknown.kind(), ErrorKind::NotFound);

        // Informational checklists can be filled ahead of time.
        engine
            .set_checklist_item("lead-1", "discovery", "budget", true)
            .await
            .unwrap();

        engine.advance("lead-1", "new-lead", "ok").await.unwrap();
        engine.advance("lead-1", "intro-call", "ok").await.unwrap();
        engine.advance("lead-1", "discovery", "ok").await.unwrap();
        let locked = engine
            .set_checklist_item("lead-1", "discovery", "timeline", true)
            .await
            .unwrap_err();
        assert_eq!(locked.kind(), ErrorKind::InvalidTransition);
    }

    #[tokio::test]
    async fn sync_unknown_name_is_not_found() {
        let (engine, _) = engine();
        engine.create("deal-1", WorkflowType::SalesDeal).await.unwrap();
        let err = engine
            .record_auto_sync("deal-1", "Prospecting")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn sync_marks_completions_auto_synced() {
        let (engine, _) = engine();
        engine.create("deal-1", WorkflowType::SalesDeal).await.unwrap();
        let deal = engine
            .record_auto_sync("deal-1", "proposal/price quote")
            .await
            .unwrap();
        assert_eq!(deal.current_stage_id, "quote-sent");
        let completions = engine.storage().list_completions("deal-1").await.unwrap();
        assert_eq!(completions.len(), 3);
        assert!(completions.iter().all(|c| c.is_auto_synced));
    }

    #[tokio::test]
    async fn transitions_publish_stage_changed() {
        let (engine, sink) = engine();
        engine.create("lead-1", WorkflowType::SalesLead).await.unwrap();
        engine.advance("lead-1", "new-lead", "ok").await.unwrap();
        engine.revert("lead-1", "new-lead").await.unwrap();
        engine.drain_notifications().await;
        let changes = sink
            .calls()
            .into_iter()
            .filter(|c| matches!(c, crate::sink::SinkCall::Send { template, .. } if template == STAGE_CHANGED))
            .count();
        assert_eq!(changes, 2);
    }

    #[tokio::test]
    async fn sink_failure_does_not_fail_transition() {
        let (engine, sink) = engine();
        sink.set_failing(true);
        engine.create("lead-1", WorkflowType::SalesLead).await.unwrap();
        let lead = engine.advance("lead-1", "new-lead", "ok").await.unwrap();
        engine.drain_notifications().await;
        assert_eq!(lead.current_stage_id, "intro-call");
        assert!(!sink.calls().is_empty());
    }

    #[tokio::test]
    async fn snapshot_collects_everything() {
        let (engine, _) = engine();
        engine.create("lead-1", WorkflowType::SalesLead).await.unwrap();
        engine.advance("lead-1", "new-lead", "ok").await.unwrap();
        let snap = engine.snapshot("lead-1").await.unwrap();
        assert_eq!(snap.entity.current_stage_id, "intro-call");
        assert_eq!(snap.completions.len(), 1);
        assert_eq!(snap.timers.len(), 1);
        assert_eq!(snap.progress.completed, 1);
        assert!(snap.outcome.is_none());
    }
}
