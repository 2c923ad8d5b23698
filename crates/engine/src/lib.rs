//! stagewise-engine: the stage transition engine and everything that drives it.
//!
//! - [`Engine`] -- advance / revert / skip / branch / sync / terminal
//!   confirmation, serialized per entity
//! - [`adapter`] -- upload, manual-confirm, decision and CRM sync triggers
//! - [`scheduler`] -- business-day automation timers and the ticker task
//! - [`outcome`] -- won/lost decisions of the sales-deal workflow
//! - [`progress`] -- read-only progress projection
//!
//! Side effects leave the engine through a [`NotificationSink`]; transitions
//! never wait for, or fail because of, the sink.

pub mod adapter;
pub mod calendar;
pub mod clock;
mod engine;
mod error;
mod locks;
mod notifier;
pub mod outcome;
pub mod progress;
pub mod scheduler;
pub mod sink;

pub use adapter::{
    DecisionTrigger, ManualTrigger, SyncTrigger, TriggerOutcome, Triggers, UploadTrigger,
};
pub use calendar::BusinessCalendar;
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{Engine, EntitySnapshot, REASON_EXTERNAL_SYNC, REASON_TIMER_ELAPSED};
pub use error::{EngineError, ErrorKind};
pub use notifier::{OUTCOME_CONFIRMED, STAGE_CHANGED};
pub use outcome::{DealOutcome, OutcomeRecord};
pub use progress::{project, Progress};
pub use scheduler::{spawn_ticker, AutomationTimer, TickReport, TimerKey, TimerTable};
pub use sink::{LogSink, NotificationSink, RecordingSink, SinkCall, SinkError};
