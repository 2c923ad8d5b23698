//! Timer firing: `tick`, startup `restore`, and the background ticker.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use stagewise_core::TimerKind;
use stagewise_storage::{PipelineStorage, StorageError};
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use super::{AutomationTimer, FireResult, Finish};
use crate::engine::{Engine, REASON_TIMER_ELAPSED};
use crate::error::EngineError;

/// Summary of one scheduler pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Timers whose side effect ran.
    pub fired: usize,
    /// Timers whose side effect failed; they stay due.
    pub failed: usize,
    /// Timers found cancelled or stale once the entity lock was held.
    pub skipped: usize,
}

enum Fired {
    Yes,
    Skipped,
}

impl<S: PipelineStorage> Engine<S> {
    /// Fire every timer due at `now`.
    pub async fn tick(&self, now: OffsetDateTime) -> TickReport {
        let mut report = TickReport::default();
        for timer in self.timers().due(now) {
            match self.fire(&timer, now).await {
                Ok(Fired::Yes) => report.fired += 1,
                Ok(Fired::Skipped) => report.skipped += 1,
                Err(e) => {
                    tracing::warn!(
                        entity_id = %timer.key.entity_id,
                        stage_id = %timer.key.stage_id,
                        kind = %timer.key.kind,
                        attempts = timer.attempts + 1,
                        error = %e,
                        "automation timer failed; retrying next tick"
                    );
                    report.failed += 1;
                }
            }
        }
        report
    }

    async fn fire(&self, timer: &AutomationTimer, now: OffsetDateTime) -> Result<Fired, EngineError> {
        let key = &timer.key;
        let guard = self.lock_entity(&key.entity_id).await;
        if !self.timers().still_armed(timer) {
            return Ok(Fired::Skipped);
        }
        let entity = match self.storage().get_entity(&key.entity_id).await {
            Ok(entity) => entity,
            Err(StorageError::EntityNotFound { .. }) => {
                self.timers().cancel_all(&key.entity_id, now);
                return Ok(Fired::Skipped);
            }
            Err(e) => {
                self.timers().finish(timer, FireResult::Failed);
                return Err(e.into());
            }
        };
        if entity.current_stage_id != key.stage_id {
            self.timers()
                .cancel_exited(&entity.entity_id, &entity.current_stage_id, now);
            return Ok(Fired::Skipped);
        }

        if key.kind == TimerKind::AutoAdvance {
            // Leaving the stage removes this timer; nothing to re-arm.
            return match self
                .advance_locked(&key.entity_id, &key.stage_id, REASON_TIMER_ELAPSED, false)
                .await
            {
                Ok(_) => Ok(Fired::Yes),
                Err(e) => {
                    self.timers().finish(timer, FireResult::Failed);
                    Err(e)
                }
            };
        }

        // Sink calls run outside the entity lock; a transition that lands
        // meanwhile cancels the timer and `finish` then declines to re-arm.
        drop(guard);
        let sink = Arc::clone(self.sink());
        let result = match key.kind {
            TimerKind::FollowUp => sink.enroll_in_sequence(&key.entity_id).await,
            _ => {
                let template = timer
                    .rule
                    .template
                    .as_deref()
                    .unwrap_or(key.kind.as_str());
                let payload = json!({
                    "workflow": entity.workflow_type,
                    "stage_id": key.stage_id,
                    "fire": timer.fired_count + 1,
                });
                sink.send(&key.entity_id, template, &payload).await
            }
        };

        match result {
            Ok(()) => {
                let next = self.next_firing(timer, now);
                match self.timers().finish(timer, FireResult::Fired { next }) {
                    Finish::Recorded => {}
                    Finish::Cancelled => {
                        tracing::debug!(
                            entity_id = %key.entity_id,
                            stage_id = %key.stage_id,
                            "timer cancelled while firing; not re-armed"
                        );
                        // The transition that cancelled it saw no enrollment yet.
                        if key.kind == TimerKind::FollowUp {
                            self.publish_unenroll(&key.entity_id);
                        }
                    }
                    Finish::Replaced => {
                        tracing::debug!(
                            entity_id = %key.entity_id,
                            stage_id = %key.stage_id,
                            "timer re-armed while firing"
                        );
                    }
                }
                tracing::info!(
                    entity_id = %key.entity_id,
                    stage_id = %key.stage_id,
                    kind = %key.kind,
                    rearmed = next.is_some(),
                    "automation timer fired"
                );
                Ok(Fired::Yes)
            }
            Err(e) => {
                self.timers().finish(timer, FireResult::Failed);
                Err(e.into())
            }
        }
    }

    /// When a timer that just fired should fire again, if ever.
    fn next_firing(&self, timer: &AutomationTimer, now: OffsetDateTime) -> Option<OffsetDateTime> {
        if !timer.key.kind.is_recurring() {
            return None;
        }
        let fired = timer.fired_count + 1;
        if timer.rule.max_fires.is_some_and(|max| fired >= max) {
            return None;
        }
        Some(
            self.calendar()
                .add_business_days(now, timer.rule.delay_business_days),
        )
    }

    /// Re-arm the timers of every stored entity from its current stage.
    ///
    /// Timers are process-local, so this runs once at startup. Delays are
    /// measured from the entity's last update, which is when it entered its
    /// current stage for every transition the engine performs.
    pub async fn restore(&self) -> Result<usize, EngineError> {
        let entities = self.storage().list_entities(None).await?;
        let mut armed = 0;
        for entity in &entities {
            let _guard = self.lock_entity(&entity.entity_id).await;
            let stage = self
                .catalog()
                .stage(entity.workflow_type, &entity.current_stage_id)?;
            armed += self.enter_stage(entity, stage, entity.updated_at);
        }
        tracing::info!(entities = entities.len(), armed, "automation timers restored");
        Ok(armed)
    }
}

/// Drive [`Engine::tick`] every `every` until `shutdown` turns true or its
/// sender is dropped.
pub fn spawn_ticker<S: PipelineStorage>(
    engine: Arc<Engine<S>>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = engine.tick(engine.now()).await;
                    if report.fired + report.failed > 0 {
                        tracing::info!(
                            fired = report.fired,
                            failed = report.failed,
                            skipped = report.skipped,
                            "scheduler tick"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("scheduler ticker stopped");
    })
}
