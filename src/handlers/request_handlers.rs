//! Task status polling.

use crate::{AppState, errors::AppError};
use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

/// `GET /api/requests/{task_id}` — current `{state, step, total, errors}`
/// of a dispatched task.
pub async fn request_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let id = Uuid::parse_str(&task_id)
        .map_err(|_| AppError::bad_request("task id must be a UUID"))?;
    let status = state
        .runner
        .status(&id)
        .ok_or_else(|| AppError::not_found(format!("unknown task {task_id}")))?;
    Ok(Json(status))
}
