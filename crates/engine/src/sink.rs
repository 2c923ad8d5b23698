//! Notification sink collaborator.
//!
//! The engine treats the sink as fire-and-forget: calls happen on background
//! tasks and failures are logged, never returned to the request that caused
//! them. The scheduler is the one exception; it inspects the result to decide
//! whether a timer has to be retried.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

// ──────────────────────────────────────────────
// SinkError
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The remote side refused or could not be reached.
    #[error("sink '{sink}' failed to deliver: {message}")]
    Delivery { sink: String, message: String },
    /// Missing or malformed sink configuration.
    #[error("sink config error: {message}")]
    Config { message: String },
}

// ──────────────────────────────────────────────
// NotificationSink trait
// ──────────────────────────────────────────────

#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Send one templated notification about an entity.
    async fn send(
        &self,
        entity_id: &str,
        template: &str,
        payload: &serde_json::Value,
    ) -> Result<(), SinkError>;

    /// Put the entity into the follow-up email sequence.
    async fn enroll_in_sequence(&self, entity_id: &str) -> Result<(), SinkError>;

    /// Take the entity out of the follow-up sequence.
    async fn unenroll(&self, entity_id: &str) -> Result<(), SinkError>;

    /// Short identifier used in log lines (e.g. "log", "webhook").
    fn sink_id(&self) -> &str;
}

// ──────────────────────────────────────────────
// LogSink
// ──────────────────────────────────────────────

/// Sink that only emits tracing events. Used when no webhook is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn send(
        &self,
        entity_id: &str,
        template: &str,
        payload: &serde_json::Value,
    ) -> Result<(), SinkError> {
        tracing::info!(entity_id, template, %payload, "notification");
        Ok(())
    }

    async fn enroll_in_sequence(&self, entity_id: &str) -> Result<(), SinkError> {
        tracing::info!(entity_id, "enrolled in follow-up sequence");
        Ok(())
    }

    async fn unenroll(&self, entity_id: &str) -> Result<(), SinkError> {
        tracing::info!(entity_id, "unenrolled from follow-up sequence");
        Ok(())
    }

    fn sink_id(&self) -> &str {
        "log"
    }
}

// ──────────────────────────────────────────────
// RecordingSink
// ──────────────────────────────────────────────

/// A call observed by [`RecordingSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    Send {
        entity_id: String,
        template: String,
        payload: serde_json::Value,
    },
    Enroll {
        entity_id: String,
    },
    Unenroll {
        entity_id: String,
    },
}

impl SinkCall {
    pub fn entity_id(&self) -> &str {
        match self {
            SinkCall::Send { entity_id, .. }
            | SinkCall::Enroll { entity_id }
            | SinkCall::Unenroll { entity_id } => entity_id,
        }
    }
}

/// In-memory sink that records every call and can be switched into a
/// failing mode. Failed calls are recorded too.
#[derive(Debug, Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<SinkCall>>,
    failing: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Calls other than `stage-changed` notifications.
    pub fn automation_calls(&self) -> Vec<SinkCall> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, SinkCall::Send { template, .. } if template == "stage-changed"))
            .collect()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    fn record(&self, call: SinkCall) -> Result<(), SinkError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::Delivery {
                sink: "recording".to_string(),
                message: "configured to fail".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send(
        &self,
        entity_id: &str,
        template: &str,
        payload: &serde_json::Value,
    ) -> Result<(), SinkError> {
        self.record(SinkCall::Send {
            entity_id: entity_id.to_string(),
            template: template.to_string(),
            payload: payload.clone(),
        })
    }

    async fn enroll_in_sequence(&self, entity_id: &str) -> Result<(), SinkError> {
        self.record(SinkCall::Enroll {
            entity_id: entity_id.to_string(),
        })
    }

    async fn unenroll(&self, entity_id: &str) -> Result<(), SinkError> {
        self.record(SinkCall::Unenroll {
            entity_id: entity_id.to_string(),
        })
    }

    fn sink_id(&self) -> &str {
        "recording"
    }
}
