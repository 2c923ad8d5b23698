//! Background delivery of engine notifications.

use std::sync::{Arc, Mutex};

use tokio::task::JoinSet;

use crate::sink::{NotificationSink, SinkError};

/// Template of the notification published after every committed transition.
pub const STAGE_CHANGED: &str = "stage-changed";
/// Template of the notification published when a terminal stage is decided.
pub const OUTCOME_CONFIRMED: &str = "outcome-confirmed";

#[derive(Debug, Clone)]
pub(crate) enum Notification {
    Send {
        entity_id: String,
        template: String,
        payload: serde_json::Value,
    },
    Unenroll {
        entity_id: String,
    },
}

/// Spawns sink calls onto a tracked task set so the caller never waits on
/// the sink, while shutdown can still wait for every pending delivery.
pub(crate) struct Notifier {
    sink: Arc<dyn NotificationSink>,
    tasks: Mutex<JoinSet<()>>,
}

impl Notifier {
    pub(crate) fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Notifier {
            sink,
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    pub(crate) fn sink(&self) -> &Arc<dyn NotificationSink> {
        &self.sink
    }

    pub(crate) fn publish(&self, notification: Notification) {
        let sink = Arc::clone(&self.sink);
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        // Reap finished deliveries so the set stays small.
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            if let Err(e) = deliver(sink.as_ref(), &notification).await {
                tracing::warn!(error = %e, ?notification, "notification failed");
            }
        });
    }

    /// Wait for every notification published so far.
    pub(crate) async fn drain(&self) {
        let mut pending = {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *tasks)
        };
        while let Some(joined) = pending.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "notification task panicked");
            }
        }
    }
}

async fn deliver(sink: &dyn NotificationSink, notification: &Notification) -> Result<(), SinkError> {
    match notification {
        Notification::Send {
            entity_id,
            template,
            payload,
        } => sink.send(entity_id, template, payload).await,
        Notification::Unenroll { entity_id } => sink.unenroll(entity_id).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{RecordingSink, SinkCall};
    use serde_json::json;

    #[tokio::test]
    async fn drain_waits_for_published_notifications() {
        let sink = Arc::new(RecordingSink::new());
        let notifier = Notifier::new(sink.clone());
        for i in 0..5 {
            notifier.publish(Notification::Send {
                entity_id: format!("lead-{i}"),
                template: STAGE_CHANGED.to_string(),
                payload: json!({}),
            });
        }
        notifier.drain().await;
        assert_eq!(sink.calls().len(), 5);
    }

    #[tokio::test]
    async fn failures_are_swallowed() {
        let sink = Arc::new(RecordingSink::new());
        sink.set_failing(true);
        let notifier = Notifier::new(sink.clone());
        notifier.publish(Notification::Unenroll {
            entity_id: "deal-1".into(),
        });
        notifier.drain().await;
        assert_eq!(
            sink.calls(),
            vec![SinkCall::Unenroll {
                entity_id: "deal-1".into()
            }]
        );
    }
}
