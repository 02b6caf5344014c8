//! Entity endpoints

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use tracing::error;

use super::{ApiError, ApiResponse, ListParams};
use crate::access::{enforce_rbac, parse_roles_header};
use crate::api::state::AppState;
use crate::api::ROLES_HEADER;
use crate::history::HistoryError;
use crate::paths::snapshot_path;
use crate::reader::{list_manifests, ListOptions};
use crate::storage::{read_document, StoreError};
use crate::types::{parse_timestamp, EntityKind, Envelope, Environment};

/// Resolve route parameters and apply the access policy
fn authorize(
    headers: &HeaderMap,
    method: &Method,
    env: &str,
    entity: &str,
) -> Result<(Environment, EntityKind), Response> {
    let env = env.parse::<Environment>().map_err(|e| {
        (StatusCode::NOT_FOUND, Json(ApiError::not_found(e.to_string()))).into_response()
    })?;
    let kind = EntityKind::from_tag_or_segment(entity).map_err(|e| {
        (StatusCode::NOT_FOUND, Json(ApiError::not_found(e.to_string()))).into_response()
    })?;

    let roles = headers
        .get(ROLES_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(parse_roles_header)
        .unwrap_or_default();

    let decision = enforce_rbac(&roles, Some(kind), method.as_str(), Some(env));
    if !decision.allowed {
        return Err((StatusCode::FORBIDDEN, Json(decision)).into_response());
    }

    Ok((env, kind))
}

/// POST /api/:env/:entity - append a mutated entity body to the history log
pub async fn create_entity(
    State(state): State<Arc<AppState>>,
    Path((env, entity)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let (env, kind) = match authorize(&headers, &Method::POST, &env, &entity) {
        Ok(resolved) => resolved,
        Err(denied) => return denied,
    };

    let Value::Object(doc) = body else {
        let error = ApiError::bad_request("entity body must be a JSON object");
        return (StatusCode::BAD_REQUEST, Json(error)).into_response();
    };

    let envelope = match Envelope::from_document(&doc) {
        Ok(envelope) => envelope,
        Err(e) => {
            let error = ApiError::validation("invalid envelope", vec![e.to_string()]);
            return (StatusCode::UNPROCESSABLE_ENTITY, Json(error)).into_response();
        }
    };
    if envelope.env != env || envelope.entity != kind {
        let error = ApiError::bad_request(format!(
            "body is a {} in {}, route is {} in {}",
            envelope.entity, envelope.env, kind, env
        ));
        return (StatusCode::BAD_REQUEST, Json(error)).into_response();
    }

    match state.history.append(doc).await {
        Ok(record) => (StatusCode::CREATED, Json(ApiResponse::new(record))).into_response(),
        Err(HistoryError::Validation(details)) => {
            let error = ApiError::validation("schema validation failed", details);
            (StatusCode::UNPROCESSABLE_ENTITY, Json(error)).into_response()
        }
        Err(HistoryError::Envelope(e)) => {
            let error = ApiError::validation("invalid envelope", vec![e.to_string()]);
            (StatusCode::UNPROCESSABLE_ENTITY, Json(error)).into_response()
        }
        Err(e @ HistoryError::IdentifierCollision(_)) => {
            error!(error = %e, "Refusing to retry history write");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(ApiError::internal(e.to_string()))).into_response()
        }
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, Json(ApiError::unavailable(e.to_string()))).into_response(),
    }
}

/// GET /api/:env/:entity - list manifests, newest first
pub async fn list_entities(
    State(state): State<Arc<AppState>>,
    Path((env, entity)): Path<(String, String)>,
    Query(params): Query<ListParams>,
    headers: HeaderMap,
) -> Response {
    let (env, kind) = match authorize(&headers, &Method::GET, &env, &entity) {
        Ok(resolved) => resolved,
        Err(denied) => return denied,
    };

    let since = match params.since.as_deref() {
        Some(raw) => match parse_timestamp(raw) {
            Some(ts) => Some(ts),
            None => {
                let error = ApiError::bad_request(format!("'{}' is not an RFC 3339 timestamp", raw));
                return (StatusCode::BAD_REQUEST, Json(error)).into_response();
            }
        },
        None => None,
    };
    let options = ListOptions {
        since,
        limit: Some(params.normalized_limit()),
    };

    match list_manifests(state.store.as_ref(), env, kind, &options).await {
        Ok(listing) => {
            let total = listing.records.len();
            Json(ApiResponse::with_total(listing, total)).into_response()
        }
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, Json(ApiError::unavailable(e.to_string()))).into_response(),
    }
}

/// GET /api/:env/:entity/:id - current snapshot
pub async fn get_entity(
    State(state): State<Arc<AppState>>,
    Path((env, entity, id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Response {
    let (env, kind) = match authorize(&headers, &Method::GET, &env, &entity) {
        Ok(resolved) => resolved,
        Err(denied) => return denied,
    };

    let id = urlencoding::decode(&id)
        .map(|s| s.into_owned())
        .unwrap_or(id);
    if id.is_empty() || id.contains('/') || id == "." || id == ".." {
        let error = ApiError::bad_request(format!("invalid id '{}'", id));
        return (StatusCode::BAD_REQUEST, Json(error)).into_response();
    }

    match read_document(state.store.as_ref(), &snapshot_path(env, kind, &id)).await {
        Ok(doc) => Json(ApiResponse::new(doc)).into_response(),
        Err(StoreError::NotFound(_)) => {
            let error = ApiError::not_found(format!("{} '{}' not found", kind, id));
            (StatusCode::NOT_FOUND, Json(error)).into_response()
        }
        Err(e @ StoreError::Malformed(_)) => {
            (StatusCode::INTERNAL_SERVER_ERROR, Json(ApiError::internal(e.to_string()))).into_response()
        }
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, Json(ApiError::unavailable(e.to_string()))).into_response(),
    }
}
