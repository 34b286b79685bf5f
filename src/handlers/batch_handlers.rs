//! Batch lifecycle endpoints.
//!
//! All mutating endpoints dispatch an asynchronous task and answer
//! immediately with `{request_id, datetime}`; the caller polls the task
//! status or waits for the import-manager notification.

use crate::{
    AppState,
    errors::AppError,
    models::payload::RequestPayload,
    services::batches::batch_status,
    tasks::{cleanup, ingest, pid_rebuild, promote},
};
use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::Local;
use serde_json::json;
use uuid::Uuid;

/// Standard async-dispatch response.
pub fn async_id_response(request_id: Uuid) -> Json<serde_json::Value> {
    Json(json!({
        "request_id": request_id.to_string(),
        "datetime": Local::now().format("%Y%m%dT%H:%M:%S").to_string(),
    }))
}

/// `GET /api/batches/{batch_id}` — recompute and report batch readiness.
pub async fn get_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let svc = &state.services;
    let collection = svc.config.batch_collection(&batch_id);
    let local_path = svc.config.batch_staging(&batch_id);
    let (status, files) = batch_status(svc.storage.as_ref(), &collection, &local_path)
        .await
        .map_err(|err| AppError::internal(err.to_string()))?;
    Ok(Json(json!({ "batch_id": batch_id, "status": status, "files": files })))
}

/// `POST /api/batches/{batch_id}` — create the batch locations and start
/// the ingestion task.
pub async fn create_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
    Json(payload): Json<RequestPayload>,
) -> Result<impl IntoResponse, AppError> {
    let svc = state.services.clone();

    let collection = svc.config.batch_collection(&batch_id);
    svc.storage
        .create_collection(&collection)
        .await
        .map_err(|err| AppError::internal(err.to_string()))?;
    tokio::fs::create_dir_all(svc.config.batch_staging(&batch_id))
        .await
        .map_err(|err| AppError::internal(err.to_string()))?;

    let id = state
        .runner
        .submit(move |ctx| ingest::ingest_batch(ctx, svc, batch_id, payload));
    Ok(async_id_response(id))
}

/// `POST /api/batches/{batch_id}/approve` — promote verified files into
/// production and assign PIDs.
pub async fn approve_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
    Json(payload): Json<RequestPayload>,
) -> Result<impl IntoResponse, AppError> {
    let svc = state.services.clone();
    let id = state
        .runner
        .submit(move |ctx| promote::promote_batch(ctx, svc, batch_id, payload));
    Ok(async_id_response(id))
}

/// `DELETE /api/batches` — delete the batches named in the payload.
pub async fn delete_batches(
    State(state): State<AppState>,
    Json(payload): Json<RequestPayload>,
) -> Result<impl IntoResponse, AppError> {
    let svc = state.services.clone();
    let id = state
        .runner
        .submit(move |ctx| cleanup::delete_batches(ctx, svc, payload));
    Ok(async_id_response(id))
}

/// `POST /api/pidcache` — rebuild the PID cache from the production
/// collection metadata.
pub async fn rebuild_pid_cache(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let svc = state.services.clone();
    let collection = svc.config.production_coll.clone();
    let id = state
        .runner
        .submit(move |ctx| pid_rebuild::rebuild_pid_cache(ctx, svc, collection));
    Ok(async_id_response(id))
}
