//! Trigger adapters: translate outside events into engine transitions.
//!
//! Each adapter wraps a shared [`Engine`] and decides which transition an
//! event implies:
//! - [`UploadTrigger`] -- artifact uploads and deletions
//! - [`ManualTrigger`] -- a user confirming the stage they are looking at
//! - [`DecisionTrigger`] -- a user picking one of a decision stage's options
//! - [`SyncTrigger`] -- stage names pushed by the external CRM
//!
//! [`Triggers`] bundles all four over one engine.

pub mod decision;
pub mod manual;
pub mod sync;
pub mod upload;

use std::sync::Arc;

use serde::Serialize;
use stagewise_storage::{EntityRecord, PipelineStorage};

use crate::engine::Engine;

pub use decision::DecisionTrigger;
pub use manual::ManualTrigger;
pub use sync::SyncTrigger;
pub use upload::UploadTrigger;

pub const REASON_FILE_UPLOADED: &str = "file-uploaded";
pub const REASON_FILE_DELETED: &str = "file-deleted";
pub const REASON_MANUAL_CONFIRM: &str = "manual-confirm";

// ──────────────────────────────────────────────
// TriggerOutcome
// ──────────────────────────────────────────────

/// What an adapter did with an event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "entity", rename_all = "kebab-case")]
pub enum TriggerOutcome {
    /// The entity moved forward.
    Advanced(EntityRecord),
    /// The entity moved back.
    Reverted(EntityRecord),
    /// The event was recorded without a transition.
    Stored(EntityRecord),
}

impl TriggerOutcome {
    pub fn entity(&self) -> &EntityRecord {
        match self {
            TriggerOutcome::Advanced(e) | TriggerOutcome::Reverted(e) | TriggerOutcome::Stored(e) => e,
        }
    }

    pub fn into_entity(self) -> EntityRecord {
        match self {
            TriggerOutcome::Advanced(e) | TriggerOutcome::Reverted(e) | TriggerOutcome::Stored(e) => e,
        }
    }
}

// ──────────────────────────────────────────────
// Triggers
// ──────────────────────────────────────────────

/// All trigger adapters over one engine.
pub struct Triggers<S: PipelineStorage> {
    pub upload: UploadTrigger<S>,
    pub manual: ManualTrigger<S>,
    pub decision: DecisionTrigger<S>,
    pub sync: SyncTrigger<S>,
}

impl<S: PipelineStorage> Triggers<S> {
    pub fn new(engine: Arc<Engine<S>>) -> Self {
        Triggers {
            upload: UploadTrigger::new(Arc::clone(&engine)),
            manual: ManualTrigger::new(Arc::clone(&engine)),
            decision: DecisionTrigger::new(Arc::clone(&engine)),
            sync: SyncTrigger::new(engine),
        }
    }
}
