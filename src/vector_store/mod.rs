pub mod pgvector;

use async_trait::async_trait;

use crate::models::chunk::DocumentChunk;

/// Abstract vector store interface.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Initialize the store (create tables, etc.).
    async fn initialize(&self) -> anyhow::Result<()>;

    /// Store all chunks for a document in a single atomic batch.
    /// An empty slice is a no-op, not an error.
    async fn store_embeddings(&self, chunks: &[DocumentChunk]) -> anyhow::Result<()>;

    /// Find similar chunks within a project by embedding.
    async fn query_similar(
        &self,
        query_embedding: &[f32],
        k: usize,
        project_id: &str,
        doc_ids: Option<&[String]>,
    ) -> anyhow::Result<Vec<DocumentChunk>>;

    /// Delete all chunks for a document. Returns the number removed.
    async fn delete_by_document_id(&self, document_id: &str) -> anyhow::Result<u64>;
}
