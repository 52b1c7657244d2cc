use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};

use crate::app::AppState;
use crate::database::Database;
use crate::models::api::{
    BriefingResponse, DeleteResponse, DocumentInfo, DocumentStatusResponse, HealthResponse,
};
use crate::models::document::DocumentStatus;
use crate::storage::Storage;
use crate::vector_store::VectorStore;

/// Document management routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/sources", get(list_sources))
        .route("/sources/{doc_id}/status", get(document_status))
        .route("/sources/{doc_id}/briefing", get(document_briefing))
        .route("/sources/{doc_id}", delete(delete_source))
}

/// GET /health
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: state.settings.environment.clone(),
    })
}

#[derive(Debug, Deserialize)]
struct ListParams {
    #[serde(default)]
    project_id: String,
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_limit() -> i64 {
    100
}

/// GET /sources - List a project's documents, newest first.
async fn list_sources(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<DocumentInfo>>, (StatusCode, String)> {
    if params.project_id.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "project_id is required".to_string(),
        ));
    }

    let docs = state
        .database
        .list_documents(&params.project_id, params.limit.clamp(1, 1000), params.offset.max(0))
        .await
        .map_err(|e| {
            error!("Database error: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Database error: {e}"),
            )
        })?;

    Ok(Json(
        docs.into_iter()
            .map(|d| DocumentInfo {
                id: d.id,
                project_id: d.project_id,
                filename: d.filename,
                status: d.status,
                error_message: d.error_message,
                created_at: Some(d.created_at.to_rfc3339()),
                updated_at: Some(d.updated_at.to_rfc3339()),
            })
            .collect(),
    ))
}

/// GET /sources/:doc_id/status - Durable document status.
async fn document_status(
    State(state): State<Arc<AppState>>,
    Path(doc_id): Path<String>,
) -> Result<Json<DocumentStatusResponse>, (StatusCode, String)> {
    let doc = state
        .database
        .get_document(&doc_id)
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Database error: {e}"),
            )
        })?
        .ok_or_else(|| (StatusCode::NOT_FOUND, "Document not found".to_string()))?;

    Ok(Json(DocumentStatusResponse {
        status: doc.status,
        error_message: doc.error_message,
    }))
}

/// GET /sources/:doc_id/briefing - Post-processing annotations.
/// 404 until the document is READY and the briefing has landed.
async fn document_briefing(
    State(state): State<Arc<AppState>>,
    Path(doc_id): Path<String>,
) -> Result<Json<BriefingResponse>, (StatusCode, String)> {
    let doc = state
        .database
        .get_document(&doc_id)
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Database error: {e}"),
            )
        })?
        .ok_or_else(|| (StatusCode::NOT_FOUND, "Document not found".to_string()))?;

    if doc.status != DocumentStatus::Ready || !doc.has_briefing() {
        return Err((
            StatusCode::NOT_FOUND,
            "Briefing not available yet".to_string(),
        ));
    }

    Ok(Json(BriefingResponse {
        summary: doc.summary.unwrap_or_default(),
        key_topics: doc.topics,
        suggested_questions: doc.suggested_questions,
    }))
}

/// DELETE /sources/:doc_id - Remove a document from both stores.
///
/// Two-phase, best-effort: vector chunks first, then the metadata row. The
/// response reports each side separately so partial cleanup is detectable.
/// Deleting an unknown or already-deleted id reports `db_deleted: false`
/// rather than an error. Deleting a PROCESSING document is rejected — its
/// background job is still writing, so the client retries once the document
/// reaches a terminal state.
async fn delete_source(
    State(state): State<Arc<AppState>>,
    Path(doc_id): Path<String>,
) -> Result<Json<DeleteResponse>, (StatusCode, String)> {
    let doc = state.database.get_document(&doc_id).await.map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Database error: {e}"),
        )
    })?;

    let Some(doc) = doc else {
        return Ok(Json(DeleteResponse {
            document_id: doc_id,
            db_deleted: false,
            vectors_deleted: false,
        }));
    };

    if doc.status == DocumentStatus::Processing {
        return Err((
            StatusCode::CONFLICT,
            "Document is still processing; retry after it reaches a terminal state".to_string(),
        ));
    }

    let vectors_deleted = match state.vector_store.delete_by_document_id(&doc_id).await {
        Ok(_) => true,
        Err(e) => {
            error!("Vector delete failed for {doc_id}: {e}");
            false
        }
    };

    let db_deleted = state.database.delete_document(&doc_id).await.map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Database error: {e}"),
        )
    })?;

    // Best-effort blob cleanup; a leftover file is harmless once the row
    // is gone.
    if let Err(e) = state.storage.delete(&doc.file_path).await {
        error!("Blob delete failed for {doc_id}: {e}");
    }

    info!("Deleted document {doc_id} (db={db_deleted}, vectors={vectors_deleted})");

    Ok(Json(DeleteResponse {
        document_id: doc_id,
        db_deleted,
        vectors_deleted,
    }))
}
