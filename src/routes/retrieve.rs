use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use std::sync::Arc;
use tracing::error;

use crate::app::AppState;
use crate::embedding::EmbeddingModel;
use crate::models::api::{RetrieveChunk, RetrieveRequest, RetrieveResponse};
use crate::vector_store::VectorStore;

/// Retrieval routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/retrieve", post(retrieve_chunks))
}

/// POST /retrieve - Project-scoped similarity search over ingested chunks.
async fn retrieve_chunks(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RetrieveRequest>,
) -> Result<Json<RetrieveResponse>, (StatusCode, String)> {
    if req.project_id.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "project_id is required".to_string(),
        ));
    }

    // 1. Embed the query.
    let query_embedding = state
        .embedding_model
        .embed_for_query(&req.query)
        .await
        .map_err(|e| {
            error!("Embedding error: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Embedding error: {e}"),
            )
        })?;

    // 2. Query the vector store within the project.
    let chunks = state
        .vector_store
        .query_similar(
            &query_embedding,
            req.k,
            &req.project_id,
            req.document_ids.as_deref(),
        )
        .await
        .map_err(|e| {
            error!("Query error: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Query error: {e}"),
            )
        })?;

    // 3. Filter by minimum score.
    let filtered: Vec<RetrieveChunk> = chunks
        .into_iter()
        .filter(|c| c.score >= req.min_score)
        .map(|c| RetrieveChunk {
            document_id: c.document_id,
            position: c.position,
            content: c.content,
            score: c.score,
        })
        .collect();

    Ok(Json(RetrieveResponse { chunks: filtered }))
}
