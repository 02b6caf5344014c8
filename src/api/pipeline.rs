//! Push notification handlers
//!
//! Delivery is at-least-once and redelivers on any non-2xx status, so:
//! written / skipped -> 200, conflict -> 409, transient failure -> 503.
//! Undecodable bodies are acknowledged with 200 to avoid retry storms.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::warn;

use super::rest::ApiError;
use super::state::AppState;
use crate::notification::{decode_push, ObjectNotification};
use crate::pipeline::{PipelineError, SkipReason};

/// POST /pipeline/snapshot - history write notification
pub async fn snapshot_push(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let notification = match decode(&state, &body) {
        Ok(n) => n,
        Err(ack) => return ack,
    };

    match state.snapshots.handle(&notification.name).await {
        Ok(outcome) => {
            let status = if outcome.is_conflict() {
                StatusCode::CONFLICT
            } else {
                StatusCode::OK
            };
            (status, Json(outcome)).into_response()
        }
        Err(e) => transient(e),
    }
}

/// POST /pipeline/project - snapshot write notification
pub async fn project_push(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let notification = match decode(&state, &body) {
        Ok(n) => n,
        Err(ack) => return ack,
    };

    match state.projector.handle(&notification.name).await {
        Ok(outcome) => (status_for(outcome.skipped), Json(outcome)).into_response(),
        Err(e) => transient(e),
    }
}

/// POST /pipeline/alerts - snapshot write notification
pub async fn alerts_push(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let notification = match decode(&state, &body) {
        Ok(n) => n,
        Err(ack) => return ack,
    };

    match state.rules.handle(&notification.name).await {
        Ok(outcome) => (status_for(outcome.skipped), Json(outcome)).into_response(),
        Err(e) => transient(e),
    }
}

fn decode(state: &AppState, body: &[u8]) -> Result<ObjectNotification, Response> {
    decode_push(body).map_err(|e| {
        warn!(error = %e, "Acknowledging undecodable notification");
        state.stats.record_malformed_notification();
        (
            StatusCode::OK,
            Json(json!({"acknowledged": true, "error": e.to_string()})),
        )
            .into_response()
    })
}

fn status_for(skipped: Option<SkipReason>) -> StatusCode {
    match skipped {
        Some(SkipReason::Conflict) => StatusCode::CONFLICT,
        _ => StatusCode::OK,
    }
}

fn transient(e: PipelineError) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ApiError::unavailable(e.to_string())),
    )
        .into_response()
}
