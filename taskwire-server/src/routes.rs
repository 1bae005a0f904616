//! Axum handlers: `list_tasks`/`add_task`/`get_task`/`delete_task` under
//! `/apps/{app}/taskqueues/{queue}/tasks[/...]`, plus a `/status` liveness
//! check. Grounded in `asynxd/asynxd/apis.py`'s view functions.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde_json::json;
use taskwire_core::Store;

use crate::error::AppError;
use crate::state::AppState;
use crate::validation::{parse_identifier, parse_list_params, validate_new_task, Identifier};
use crate::wire::task_to_json;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(status))
        .route(
            "/apps/{app}/taskqueues/{queue}/tasks",
            get(list_tasks).post(add_task),
        )
        .route(
            "/apps/{app}/taskqueues/{queue}/tasks/{ident}",
            get(get_task).delete(delete_task),
        )
        .with_state(state)
}

/// Liveness probe: round-trips a no-op `EXISTS` against the shared Redis
/// connection. Supplements the distilled spec per SPEC_FULL.md §10 — the
/// original ships no equivalent endpoint, but every sibling service in this
/// corpus exposes one.
async fn status(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.exists("AX:STATUS:PING").await {
        Ok(_) => (StatusCode::OK, Json(json!({"status": "ok"}))),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "error", "detail": e.to_string()})),
        ),
    }
}

async fn list_tasks(
    State(state): State<AppState>,
    Path((app, queue)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
    uri: Uri,
) -> Result<impl IntoResponse, AppError> {
    let (offset, limit) = parse_list_params(&params).map_err(|e| e.at(&uri))?;
    let engine = state.engine(&app, &queue);
    let tasks = engine.list_tasks(offset, limit).await.map_err(AppError::from).map_err(|e| e.at(&uri))?;
    let total = engine.count_tasks().await.map_err(AppError::from).map_err(|e| e.at(&uri))?;
    Ok(Json(json!({
        "items": tasks.iter().map(task_to_json).collect::<Vec<_>>(),
        "total": total,
    })))
}

async fn add_task(
    State(state): State<AppState>,
    Path((app, queue)): Path<(String, String)>,
    uri: Uri,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let value: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::parse(e.to_string()).at(&uri))?;
    let descriptor = validate_new_task(&value).map_err(|e| e.at(&uri))?;
    let engine = state.engine(&app, &queue);
    let task = engine
        .add_task(descriptor)
        .await
        .map_err(AppError::from)
        .map_err(|e| e.at(&uri))?;
    Ok((StatusCode::CREATED, Json(task_to_json(&task))))
}

async fn get_task(
    State(state): State<AppState>,
    Path((app, queue, ident)): Path<(String, String, String)>,
    uri: Uri,
) -> Result<impl IntoResponse, AppError> {
    let identifier = parse_identifier(&ident).map_err(|e| e.at(&uri))?;
    let engine = state.engine(&app, &queue);
    let task = resolve(&engine, &identifier).await.map_err(|e| e.at(&uri))?;
    Ok(Json(task_to_json(&task)))
}

async fn delete_task(
    State(state): State<AppState>,
    Path((app, queue, ident)): Path<(String, String, String)>,
    uri: Uri,
) -> Result<impl IntoResponse, AppError> {
    let identifier = parse_identifier(&ident).map_err(|e| e.at(&uri))?;
    let engine = state.engine(&app, &queue);
    let result = match &identifier {
        Identifier::Id(id) => engine.delete_task(*id).await,
        Identifier::Uuid(uuid) => engine.delete_task_by_uuid(uuid).await,
        Identifier::Cname(cname) => engine.delete_task_by_cname(cname).await,
    };
    result.map_err(AppError::from).map_err(|e| e.at(&uri))?;
    Ok(Json(serde_json::Value::Null))
}

async fn resolve<S: Store, B: taskwire_core::Broker>(
    engine: &taskwire_core::TaskQueue<S, B>,
    identifier: &Identifier,
) -> Result<taskwire_core::Task, AppError> {
    let task = match identifier {
        Identifier::Id(id) => engine.get_task(*id).await,
        Identifier::Uuid(uuid) => engine.get_task_by_uuid(uuid).await,
        Identifier::Cname(cname) => engine.get_task_by_cname(cname).await,
    };
    Ok(task?)
}
