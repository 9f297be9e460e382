//! Task API — submit, list, inspect and cancel searches, plus a digest helper.
//!
//! Submission errors map to status codes by kind: validation problems are
//! 400, an id that is still running is 409, and a full registry is 503.

use axum::extract::{Path as AxumPath, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::AppState;
use crate::error::SubmitError;
use crate::task::TaskSpec;

/// Page size when the caller gives none.
const DEFAULT_LIST_LIMIT: usize = 100;
const MAX_LIST_LIMIT: usize = 1000;

fn submit_error_status(e: &SubmitError) -> StatusCode {
    if e.is_validation() {
        return StatusCode::BAD_REQUEST;
    }
    match e {
        SubmitError::AtCapacity { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::CONFLICT,
    }
}

pub(super) async fn handler_api_tasks_create(
    State(state): State<Arc<AppState>>,
    Json(spec): Json<TaskSpec>,
) -> impl IntoResponse {
    match state.registry.submit(spec) {
        Ok(task_id) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "task_id": task_id,
                "message": "search started",
            })),
        )
            .into_response(),
        Err(e) => {
            info!(kind = e.as_label(), error = %e, "task submission rejected");
            (
                submit_error_status(&e),
                Json(serde_json::json!({"error": e.to_string(), "kind": e.as_label()})),
            )
                .into_response()
        }
    }
}

#[derive(Deserialize)]
pub(super) struct ListQuery {
    skip: Option<usize>,
    limit: Option<usize>,
}

pub(super) async fn handler_api_tasks_list(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListQuery>,
) -> impl IntoResponse {
    let skip = q.skip.unwrap_or(0);
    let limit = q.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);
    match state.registry.list(skip, limit).await {
        Ok(tasks) => Json(serde_json::json!({ "tasks": tasks })).into_response(),
        Err(e) => {
            warn!(error = %e, "task listing failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": format!("{:#}", e)})),
            )
                .into_response()
        }
    }
}

pub(super) async fn handler_api_tasks_get(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> impl IntoResponse {
    match state.registry.lookup(&id).await {
        Some(task) => Json(serde_json::json!(task)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "Task not found"})),
        )
            .into_response(),
    }
}

pub(super) async fn handler_api_tasks_cancel(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> impl IntoResponse {
    if state.registry.cancel(&id) {
        Json(serde_json::json!({"ok": true, "task_id": id})).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "No running task with that id"})),
        )
            .into_response()
    }
}

pub(super) async fn handler_api_active(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({ "tasks": state.registry.list_active() }))
}

#[derive(Deserialize)]
pub(super) struct DemoHashQuery {
    hash_type: Option<String>,
}

/// Digest of `password` under `hash_type` (default md5), for building test targets.
pub(super) async fn handler_api_demo_hash(
    State(state): State<Arc<AppState>>,
    AxumPath(password): AxumPath<String>,
    Query(q): Query<DemoHashQuery>,
) -> impl IntoResponse {
    let hash_type = q.hash_type.unwrap_or_else(|| "md5".to_string());
    match state.registry.digests().hash_hex(&hash_type, &password) {
        Ok(hash) => Json(serde_json::json!({
            "password": password,
            "hash_type": hash_type.to_ascii_lowercase(),
            "hash": hash,
        }))
        .into_response(),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": format!("{:#}", e)})),
        )
            .into_response(),
    }
}
