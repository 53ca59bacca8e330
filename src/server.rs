//! HTTP trigger surface.
//!
//! One webhook route receives the receipt notification and runs the
//! pipeline. Responses are deliberately opaque: callers get a bare
//! ok/failed signal and consult the logs for root cause.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::error::RelayError;
use crate::pipeline::{Outcome, RelayHandler};

/// Shared state for the trigger routes.
#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<RelayHandler>,
}

/// Build the trigger router.
pub fn relay_routes(handler: Arc<RelayHandler>) -> Router {
    Router::new()
        .route("/events", post(handle_event))
        .route("/healthz", get(health))
        .with_state(AppState { handler })
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "mail-relay"
    }))
}

/// POST /events
///
/// Runs one notification through the pipeline. Both a forwarded
/// message and a clean "nothing to forward" end in a 200; failure
/// detail stays in the logs.
async fn handle_event(
    State(state): State<AppState>,
    Json(event): Json<serde_json::Value>,
) -> impl IntoResponse {
    match state.handler.handle(event).await {
        Ok(Outcome::Forwarded { .. }) | Ok(Outcome::NoRecipients) => {
            (StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
        }
        Err(RelayError::InvalidEvent { .. }) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "invalid event"})),
        ),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": "forwarding failed"})),
        ),
    }
}
