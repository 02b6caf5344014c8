//! HTTP server setup with Axum

use std::sync::Arc;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::pipeline::{alerts_push, project_push, snapshot_push};
use super::rest::entities::{create_entity, get_entity, list_entities};
use super::state::AppState;
use crate::pipeline::StatsSnapshot;

/// Create the Axum router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(stats))
        // Push notification handlers
        .route("/pipeline/snapshot", post(snapshot_push))
        .route("/pipeline/project", post(project_push))
        .route("/pipeline/alerts", post(alerts_push))
        // Entity API
        .route("/api/:env/:entity", post(create_entity).get(list_entities))
        .route("/api/:env/:entity/:id", get(get_entity))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsSnapshot> {
    Json(state.stats.snapshot())
}
