use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use crate::models::chunk::DocumentChunk;
use crate::vector_store::VectorStore;

/// PostgreSQL with pgvector implementation for chunk storage.
pub struct PgVectorStore {
    pool: PgPool,
    dimensions: u32,
}

impl PgVectorStore {
    pub async fn new(uri: &str, pool_size: u32, dimensions: u32) -> anyhow::Result<Self> {
        let clean_uri = uri.replace("postgresql+asyncpg://", "postgresql://");
        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .acquire_timeout(std::time::Duration::from_secs(10))
            .connect(&clean_uri)
            .await?;

        info!("Created pgvector store connection pool (size={pool_size})");

        Ok(Self { pool, dimensions })
    }
}

fn embedding_literal(embedding: &[f32]) -> String {
    format!(
        "[{}]",
        embedding
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",")
    )
}

#[async_trait]
impl VectorStore for PgVectorStore {
    async fn initialize(&self) -> anyhow::Result<()> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await?;

        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT FROM information_schema.tables WHERE table_name = 'chunk_embeddings')",
        )
        .fetch_one(&self.pool)
        .await?;

        if !exists {
            let create_sql = format!(
                "CREATE TABLE chunk_embeddings (
                    id SERIAL PRIMARY KEY,
                    document_id VARCHAR(64) NOT NULL,
                    project_id VARCHAR(255) NOT NULL,
                    position INTEGER NOT NULL,
                    content TEXT NOT NULL,
                    embedding vector({}) NOT NULL,
                    created_at TIMESTAMP WITH TIME ZONE DEFAULT CURRENT_TIMESTAMP
                )",
                self.dimensions
            );
            sqlx::query(&create_sql).execute(&self.pool).await?;

            sqlx::query(
                "CREATE INDEX IF NOT EXISTS idx_chunk_document_id ON chunk_embeddings(document_id)",
            )
            .execute(&self.pool)
            .await?;

            sqlx::query(
                "CREATE INDEX IF NOT EXISTS idx_chunk_project_id ON chunk_embeddings(project_id)",
            )
            .execute(&self.pool)
            .await?;

            sqlx::query(
                "CREATE INDEX IF NOT EXISTS chunk_vector_idx ON chunk_embeddings
                 USING ivfflat (embedding vector_cosine_ops) WITH (lists = 100)",
            )
            .execute(&self.pool)
            .await?;
            info!(
                "Created chunk_embeddings table with vector({})",
                self.dimensions
            );
        } else {
            info!("chunk_embeddings table already exists");
        }

        Ok(())
    }

    async fn store_embeddings(&self, chunks: &[DocumentChunk]) -> anyhow::Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }

        // One transaction per document batch: either the whole chunk set
        // lands or none of it does.
        let mut tx = self.pool.begin().await?;

        // Re-ingestion replaces the chunk set wholesale.
        sqlx::query("DELETE FROM chunk_embeddings WHERE document_id = $1")
            .bind(&chunks[0].document_id)
            .execute(&mut *tx)
            .await?;

        for chunk in chunks {
            sqlx::query(
                "INSERT INTO chunk_embeddings (document_id, project_id, position, content, embedding)
                 VALUES ($1, $2, $3, $4, $5::vector)",
            )
            .bind(&chunk.document_id)
            .bind(&chunk.project_id)
            .bind(chunk.position)
            .bind(&chunk.content)
            .bind(embedding_literal(&chunk.embedding))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(
            "Stored {} chunks for document {}",
            chunks.len(),
            chunks[0].document_id
        );

        Ok(())
    }

    async fn query_similar(
        &self,
        query_embedding: &[f32],
        k: usize,
        project_id: &str,
        doc_ids: Option<&[String]>,
    ) -> anyhow::Result<Vec<DocumentChunk>> {
        let embedding_str = embedding_literal(query_embedding);

        let rows = if let Some(ids) = doc_ids {
            if ids.is_empty() {
                return Ok(vec![]);
            }
            sqlx::query(
                "SELECT document_id, project_id, position, content,
                        embedding <=> $1::vector AS distance
                 FROM chunk_embeddings
                 WHERE project_id = $2 AND document_id = ANY($3)
                 ORDER BY distance
                 LIMIT $4",
            )
            .bind(&embedding_str)
            .bind(project_id)
            .bind(ids)
            .bind(k as i64)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(
                "SELECT document_id, project_id, position, content,
                        embedding <=> $1::vector AS distance
                 FROM chunk_embeddings
                 WHERE project_id = $2
                 ORDER BY distance
                 LIMIT $3",
            )
            .bind(&embedding_str)
            .bind(project_id)
            .bind(k as i64)
            .fetch_all(&self.pool)
            .await?
        };

        let mut chunks = Vec::with_capacity(rows.len());
        for row in rows {
            let distance: f64 = row.get("distance");
            chunks.push(DocumentChunk {
                document_id: row.get("document_id"),
                project_id: row.get("project_id"),
                position: row.get("position"),
                content: row.get("content"),
                embedding: vec![],
                score: 1.0 - distance / 2.0,
            });
        }

        Ok(chunks)
    }

    async fn delete_by_document_id(&self, document_id: &str) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM chunk_embeddings WHERE document_id = $1")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        info!("Deleted all chunks for document {document_id}");
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::embedding_literal;

    #[test]
    fn test_embedding_literal_format() {
        assert_eq!(embedding_literal(&[1.0, 2.5, -0.5]), "[1,2.5,-0.5]");
        assert_eq!(embedding_literal(&[]), "[]");
    }
}
