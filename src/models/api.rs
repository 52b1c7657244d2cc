use serde::{Deserialize, Serialize};

use crate::models::document::DocumentStatus;

// ──────────────────────────── Upload ────────────────────────────

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub task_id: String,
    /// Always "accepted" — processing continues in the background.
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct TaskStatusResponse {
    pub status: String,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ──────────────────────────── Sources ────────────────────────────

#[derive(Debug, Serialize)]
pub struct DocumentStatusResponse {
    pub status: DocumentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DocumentInfo {
    pub id: String,
    pub project_id: String,
    pub filename: String,
    pub status: DocumentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub document_id: String,
    /// Whether the metadata row was actually found and deleted, distinct
    /// from the vector-store side so callers can detect partial cleanup.
    pub db_deleted: bool,
    pub vectors_deleted: bool,
}

#[derive(Debug, Serialize)]
pub struct BriefingResponse {
    pub summary: String,
    pub key_topics: Vec<String>,
    pub suggested_questions: Vec<String>,
}

// ──────────────────────────── Retrieve ────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RetrieveRequest {
    pub query: String,
    pub project_id: String,
    #[serde(default = "default_top_k")]
    pub k: usize,
    #[serde(default)]
    pub min_score: f64,
    #[serde(default)]
    pub document_ids: Option<Vec<String>>,
}

fn default_top_k() -> usize {
    10
}

#[derive(Debug, Serialize)]
pub struct RetrieveChunk {
    pub document_id: String,
    pub position: i32,
    pub content: String,
    pub score: f64,
}

#[derive(Debug, Serialize)]
pub struct RetrieveResponse {
    pub chunks: Vec<RetrieveChunk>,
}

// ──────────────────────────── Health ────────────────────────────

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}
