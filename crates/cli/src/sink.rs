//! Webhook notification sink.
//!
//! Every sink call becomes one JSON POST:
//! `{"event": "send" | "enroll" | "unenroll", "entity_id": ..., "template": ..., "payload": ...}`.

use async_trait::async_trait;
use serde_json::{json, Value};
use stagewise_engine::{NotificationSink, SinkError};

pub(crate) struct WebhookSink {
    url: String,
}

impl WebhookSink {
    pub(crate) fn new(url: &str) -> Result<Self, SinkError> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(SinkError::Config {
                message: format!("webhook url must be http(s): '{}'", url),
            });
        }
        Ok(WebhookSink {
            url: url.to_string(),
        })
    }

    async fn post(&self, body: Value) -> Result<(), SinkError> {
        let url = self.url.clone();
        tokio::task::spawn_blocking(move || {
            let agent = ureq::Agent::new_with_defaults();
            agent
                .post(&url)
                .send_json(&body)
                .map(|_| ())
                .map_err(|e| SinkError::Delivery {
                    sink: "webhook".to_string(),
                    message: e.to_string(),
                })
        })
        .await
        .map_err(|e| SinkError::Delivery {
            sink: "webhook".to_string(),
            message: format!("task join error: {}", e),
        })?
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn send(&self, entity_id: &str, template: &str, payload: &Value) -> Result<(), SinkError> {
        self.post(json!({
            "event": "send",
            "entity_id": entity_id,
            "template": template,
            "payload": payload,
        }))
        .await
    }

    async fn enroll_in_sequence(&self, entity_id: &str) -> Result<(), SinkError> {
        self.post(json!({ "event": "enroll", "entity_id": entity_id }))
            .await
    }

    async fn unenroll(&self, entity_id: &str) -> Result<(), SinkError> {
        self.post(json!({ "event": "unenroll", "entity_id": entity_id }))
            .await
    }

    fn sink_id(&self) -> &str {
        "webhook"
    }
}
