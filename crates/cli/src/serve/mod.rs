//! `stagewise serve` -- HTTP JSON API over the pipeline engine.
//!
//! Endpoints:
//! - GET    /health                                  - Server status
//! - GET    /workflows                               - Workflow types
//! - GET    /workflows/{workflow}/stages             - Stage catalog of a workflow
//! - GET    /entities                                - Tracked entities (`?workflow=`)
//! - POST   /entities                                - Start tracking an entity
//! - GET    /entities/{id}                           - Entity snapshot
//! - GET    /entities/{id}/progress                  - Progress projection
//! - POST   /entities/{id}/advance                   - Complete the current stage
//! - POST   /entities/{id}/revert                    - Move back to an earlier stage
//! - POST   /entities/{id}/skip                      - Skip a stage
//! - POST   /entities/{id}/confirm                   - Manual confirm of the active stage
//! - GET    /entities/{id}/decision                  - Options of the active decision
//! - POST   /entities/{id}/decision                  - Choose a decision option
//! - POST   /entities/{id}/artifacts                 - Upload an artifact (base64)
//! - DELETE /entities/{id}/artifacts/{slot}          - Delete an artifact
//! - PUT    /entities/{id}/checklist/{stage}/{item}  - Tick or untick a checklist item
//! - GET    /entities/{id}/outcome                   - Recorded deal outcome
//! - POST   /entities/{id}/outcome/won|lost|reset    - Decide or reset a deal
//! - POST   /sync                                    - External CRM stage feed
//!
//! The automation ticker runs alongside the server. Ctrl+C stops accepting
//! requests, stops the ticker and waits for pending notifications.

mod handlers;
mod state;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::{Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use stagewise_core::Catalog;
use stagewise_engine::{spawn_ticker, BusinessCalendar, Engine, LogSink, NotificationSink};
use stagewise_storage::MemoryStorage;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use self::handlers::*;
use self::state::AppState;
use crate::config::Config;
use crate::sink::WebhookSink;

/// Maximum request body size: 25 MB (artifacts arrive base64-encoded).
const MAX_BODY_SIZE: usize = 25 * 1024 * 1024;

/// Construct a JSON error response with the given status code and message.
fn json_error(status: StatusCode, message: &str) -> axum::response::Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

pub(crate) fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/workflows", get(handle_list_workflows))
        .route("/workflows/{workflow}/stages", get(handle_list_stages))
        .route("/entities", get(handle_list_entities).post(handle_create_entity))
        .route("/entities/{id}", get(handle_get_entity))
        .route("/entities/{id}/progress", get(handle_progress))
        .route("/entities/{id}/advance", post(handle_advance))
        .route("/entities/{id}/revert", post(handle_revert))
        .route("/entities/{id}/skip", post(handle_skip))
        .route("/entities/{id}/confirm", post(handle_confirm))
        .route(
            "/entities/{id}/decision",
            get(handle_decision_options).post(handle_decision),
        )
        .route("/entities/{id}/artifacts", post(handle_upload))
        .route("/entities/{id}/artifacts/{slot}", delete(handle_delete_artifact))
        .route(
            "/entities/{id}/checklist/{stage}/{item}",
            put(handle_checklist),
        )
        .route("/entities/{id}/outcome", get(handle_get_outcome))
        .route("/entities/{id}/outcome/won", post(handle_outcome_won))
        .route("/entities/{id}/outcome/lost", post(handle_outcome_lost))
        .route("/entities/{id}/outcome/reset", post(handle_outcome_reset))
        .route("/sync", post(handle_sync))
        .fallback(handle_not_found)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(state)
}

/// Build the engine from `config`, start the ticker and serve until Ctrl+C.
pub async fn start_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let sink: Arc<dyn NotificationSink> = match &config.notifications.webhook_url {
        Some(url) => Arc::new(WebhookSink::new(url)?),
        None => Arc::new(LogSink),
    };
    tracing::info!(sink = sink.sink_id(), "notification sink ready");

    let engine = Arc::new(
        Engine::new(
            Arc::new(Catalog::builtin()),
            Arc::new(MemoryStorage::new()),
            sink,
        )
        .with_calendar(BusinessCalendar::with_holidays(config.holidays()?)),
    );
    engine.restore().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ticker = spawn_ticker(
        Arc::clone(&engine),
        Duration::from_secs(config.scheduler.tick_interval_secs.max(1)),
        shutdown_rx,
    );

    let app = router(Arc::new(AppState::new(Arc::clone(&engine))));
    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    eprintln!("Stagewise listening on http://{}", addr);
    tracing::info!(%addr, "server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = ticker.await {
        tracing::error!(error = %e, "scheduler ticker panicked");
    }
    engine.drain_notifications().await;
    eprintln!("\nServer shut down.");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C).
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    eprintln!("\nReceived shutdown signal...");
}
