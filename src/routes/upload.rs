use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::app::AppState;
use crate::database::Database;
use crate::models::api::UploadResponse;
use crate::storage::Storage;

/// Upload admission routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/upload", post(upload_document))
}

/// POST /upload - Admit a document for asynchronous ingestion.
///
/// The synchronous path does only the write-ahead sequence: create the task
/// entry, commit the PENDING row, persist the bytes. Chunking, embedding and
/// vector-store I/O all happen in a detached background job, so the response
/// latency is bounded by the file write alone.
async fn upload_document(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), (StatusCode, String)> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut filename: Option<String> = None;
    let mut project_id: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            format!("Failed to read multipart field: {e}"),
        )
    })? {
        let field_name = field.name().unwrap_or("").to_string();
        match field_name.as_str() {
            "file" => {
                filename = field.file_name().map(|s| s.to_string());
                file_bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| {
                            (StatusCode::BAD_REQUEST, format!("Failed to read file: {e}"))
                        })?
                        .to_vec(),
                );
            }
            "project_id" => {
                project_id = Some(field.text().await.map_err(|e| {
                    (
                        StatusCode::BAD_REQUEST,
                        format!("Failed to read project_id: {e}"),
                    )
                })?);
            }
            _ => {}
        }
    }

    // Project association is mandatory: no orphan documents.
    let project_id = project_id
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                "project_id is required".to_string(),
            )
        })?;

    let file_data = file_bytes.ok_or_else(|| {
        (StatusCode::BAD_REQUEST, "No file provided".to_string())
    })?;
    let fname = filename.unwrap_or_else(|| "upload".to_string());

    // Task entry first, so the client can poll the moment it has the id.
    let task_id = uuid::Uuid::new_v4().to_string();
    state.tracker.insert(&task_id, 10, "saving");

    // Write-ahead sequence: PENDING row commits before the file lands, and
    // both before any background work is scheduled. If the process dies one
    // instruction after this handler, the reconciler recovers from the row.
    let document_id = uuid::Uuid::new_v4().to_string();
    let file_path = storage_key(&project_id, &fname, &document_id);

    if let Err(e) = state
        .database
        .insert_document(&document_id, &project_id, &fname, &file_path)
        .await
    {
        error!("Admission failed for {fname}: {e}");
        state.tracker.fail(&task_id, "could not create document record");
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Database error: {e}"),
        ));
    }

    if let Err(e) = state.storage.write(&file_path, &file_data).await {
        error!("File write failed for {fname}: {e}");
        // Roll back: remove any partial file and the orphaned row.
        if let Err(cleanup) = state.storage.delete(&file_path).await {
            warn!("Rollback of partial file {file_path} failed: {cleanup}");
        }
        if let Err(cleanup) = state.database.delete_document(&document_id).await {
            warn!("Rollback of document row {document_id} failed: {cleanup}");
        }
        state.tracker.fail(&task_id, "could not store uploaded file");
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Storage error: {e}"),
        ));
    }

    // Detached background job; the handle is intentionally discarded.
    let _handle = state
        .pipeline
        .clone()
        .spawn(document_id.clone(), task_id.clone());

    info!("Admitted document {document_id} for project {project_id} (task {task_id})");

    Ok((
        StatusCode::ACCEPTED,
        Json(UploadResponse {
            task_id,
            status: "accepted".to_string(),
        }),
    ))
}

/// Deterministic, collision-resistant storage key: the sanitized filename
/// stem keeps keys human-traceable, the document id guarantees uniqueness.
fn storage_key(project_id: &str, filename: &str, document_id: &str) -> String {
    let (stem, extension) = match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (filename, None),
    };

    let mut key = format!(
        "{}/{}-{}",
        sanitize_component(project_id),
        sanitize_component(stem),
        document_id
    );
    if let Some(ext) = extension {
        key.push('.');
        key.push_str(&sanitize_component(ext));
    }
    key
}

/// Restrict a path component to a safe character set; in particular no
/// separators, so a hostile filename or project id cannot escape the
/// storage root.
fn sanitize_component(component: &str) -> String {
    let cleaned: String = component
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}
