use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;

use crate::app::AppState;
use crate::models::api::TaskStatusResponse;

/// Upload task polling routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/upload/{task_id}/status", get(task_status))
}

/// GET /upload/:task_id/status - Poll the ephemeral progress of an upload.
async fn task_status(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskStatusResponse>, (StatusCode, String)> {
    let task = state
        .tracker
        .get(&task_id)
        .ok_or_else(|| (StatusCode::NOT_FOUND, "Task not found".to_string()))?;

    Ok(Json(TaskStatusResponse {
        status: task.status.as_str().to_string(),
        progress: task.progress,
        stage: task.stage,
        doc_id: task.doc_id,
        error: task.error,
    }))
}
