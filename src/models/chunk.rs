use serde::{Deserialize, Serialize};

/// Represents a chunk persisted in the vector store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// Id of the parent document.
    pub document_id: String,
    /// Owning tenant; every query is scoped by it.
    pub project_id: String,
    pub content: String,
    /// 0-based sequence index within the document.
    pub position: i32,
    /// Dense embedding vector (may be empty when returned from queries).
    #[serde(default)]
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub score: f64,
}

/// Represents a raw chunk from splitting (before embedding).
#[derive(Debug, Clone)]
pub struct Chunk {
    pub content: String,
}

impl Chunk {
    /// Convert to a DocumentChunk with embedding.
    pub fn into_document_chunk(
        self,
        document_id: String,
        project_id: String,
        position: i32,
        embedding: Vec<f32>,
    ) -> DocumentChunk {
        DocumentChunk {
            document_id,
            project_id,
            content: self.content,
            position,
            embedding,
            score: 0.0,
        }
    }
}
