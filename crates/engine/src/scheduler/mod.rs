//! Automation Scheduler.
//!
//! Timers live in process memory, keyed by `(entity, stage, kind)`. Each
//! follows `armed -> fired -> (re-armed | spent)`; leaving the stage cancels
//! it. The firing side lives in [`runner`].

pub mod runner;

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::Serialize;
use stagewise_core::{AutomationRule, TimerKind};
use time::OffsetDateTime;

pub use runner::{spawn_ticker, TickReport};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TimerKey {
    pub entity_id: String,
    pub stage_id: String,
    pub kind: TimerKind,
}

impl TimerKey {
    pub fn new(entity_id: &str, stage_id: &str, kind: TimerKind) -> Self {
        TimerKey {
            entity_id: entity_id.to_string(),
            stage_id: stage_id.to_string(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutomationTimer {
    pub key: TimerKey,
    pub rule: AutomationRule,
    #[serde(with = "time::serde::rfc3339")]
    pub armed_at: OffsetDateTime,
    /// `None` once the timer is spent: a one-shot that fired, or a reminder
    /// that hit its `max_fires`.
    #[serde(with = "time::serde::rfc3339::option")]
    pub fires_at: Option<OffsetDateTime>,
    pub fired_count: u32,
    /// Failed firing attempts since the last success.
    pub attempts: u32,
    #[serde(with = "time::serde::rfc3339::option")]
    pub cancelled_at: Option<OffsetDateTime>,
    #[serde(skip)]
    generation: u64,
}

impl AutomationTimer {
    pub fn is_active(&self) -> bool {
        self.cancelled_at.is_none() && self.fires_at.is_some()
    }

    pub fn is_due(&self, now: OffsetDateTime) -> bool {
        self.cancelled_at.is_none() && self.fires_at.is_some_and(|at| at <= now)
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }
}

/// What happened to a timer after its side effect ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FireResult {
    /// Side effect succeeded; re-arm at the given instant or mark spent.
    Fired { next: Option<OffsetDateTime> },
    /// Side effect failed; keep the timer due for the next tick.
    Failed,
}

/// How [`TimerTable::finish`] found the timer after its side effect ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Finish {
    /// Still the occupant of its key; the result was recorded.
    Recorded,
    /// Removed meanwhile because the entity left the stage.
    Cancelled,
    /// Re-armed under the same key meanwhile (the stage was re-entered).
    Replaced,
}

#[derive(Debug, Default)]
struct TimerState {
    timers: BTreeMap<TimerKey, AutomationTimer>,
    next_generation: u64,
}

/// The set of automation timers known to this process.
///
/// Spent timers stay in the table until their entity leaves the stage, so
/// the engine can tell that a follow-up enrollment already happened.
#[derive(Debug, Default)]
pub struct TimerTable {
    state: Mutex<TimerState>,
}

impl TimerTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Arm a timer, replacing whatever occupied the same key.
    pub fn arm(
        &self,
        key: TimerKey,
        rule: AutomationRule,
        now: OffsetDateTime,
        fires_at: OffsetDateTime,
    ) -> AutomationTimer {
        let mut state = self.state();
        state.next_generation += 1;
        let timer = AutomationTimer {
            key: key.clone(),
            rule,
            armed_at: now,
            fires_at: Some(fires_at),
            fired_count: 0,
            attempts: 0,
            cancelled_at: None,
            generation: state.next_generation,
        };
        state.timers.insert(key, timer.clone());
        timer
    }

    /// Remove every timer of `entity_id` whose stage is not `current_stage`.
    /// The removed timers are returned with `cancelled_at` set.
    pub fn cancel_exited(
        &self,
        entity_id: &str,
        current_stage: &str,
        now: OffsetDateTime,
    ) -> Vec<AutomationTimer> {
        self.remove_where(now, |k| k.entity_id == entity_id && k.stage_id != current_stage)
    }

    /// Remove every timer of `entity_id`.
    pub fn cancel_all(&self, entity_id: &str, now: OffsetDateTime) -> Vec<AutomationTimer> {
        self.remove_where(now, |k| k.entity_id == entity_id)
    }

    fn remove_where(
        &self,
        now: OffsetDateTime,
        pred: impl Fn(&TimerKey) -> bool,
    ) -> Vec<AutomationTimer> {
        let mut state = self.state();
        let keys: Vec<TimerKey> = state.timers.keys().filter(|k| pred(k)).cloned().collect();
        keys.into_iter()
            .filter_map(|k| state.timers.remove(&k))
            .map(|mut t| {
                t.cancelled_at = Some(now);
                t
            })
            .collect()
    }

    pub fn get(&self, key: &TimerKey) -> Option<AutomationTimer> {
        self.state().timers.get(key).cloned()
    }

    /// All timers of an entity, spent ones included.
    pub fn for_entity(&self, entity_id: &str) -> Vec<AutomationTimer> {
        self.state()
            .timers
            .values()
            .filter(|t| t.key.entity_id == entity_id)
            .cloned()
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.state().timers.values().filter(|t| t.is_active()).count()
    }

    /// Timers due at `now`, earliest first.
    pub fn due(&self, now: OffsetDateTime) -> Vec<AutomationTimer> {
        let mut due: Vec<AutomationTimer> = self
            .state()
            .timers
            .values()
            .filter(|t| t.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|t| t.fires_at);
        due
    }

    /// Whether `timer` is still the armed, uncancelled occupant of its key.
    pub(crate) fn still_armed(&self, timer: &AutomationTimer) -> bool {
        self.state()
            .timers
            .get(&timer.key)
            .is_some_and(|t| t.generation == timer.generation && t.is_active())
    }

    /// Record the result of a firing. Nothing is recorded or re-armed when
    /// the timer was cancelled or replaced while its side effect ran.
    pub(crate) fn finish(&self, timer: &AutomationTimer, result: FireResult) -> Finish {
        let mut state = self.state();
        let Some(current) = state.timers.get_mut(&timer.key) else {
            return Finish::Cancelled;
        };
        if current.cancelled_at.is_some() {
            return Finish::Cancelled;
        }
        if current.generation != timer.generation {
            return Finish::Replaced;
        }
        match result {
            FireResult::Fired { next } => {
                current.fired_count += 1;
                current.attempts = 0;
                current.fires_at = next;
            }
            FireResult::Failed => current.attempts += 1,
        }
        Finish::Recorded
    }
}
