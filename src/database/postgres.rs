use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::info;

use super::Database;
use crate::models::document::{Document, DocumentStatus};

/// PostgreSQL metadata store for document rows.
pub struct PostgresDatabase {
    pool: PgPool,
}

impl PostgresDatabase {
    pub async fn new(uri: &str, pool_size: u32) -> anyhow::Result<Self> {
        let clean_uri = uri.replace("postgresql+asyncpg://", "postgresql://");
        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .acquire_timeout(std::time::Duration::from_secs(10))
            .connect(&clean_uri)
            .await?;

        info!("Connected to PostgreSQL (pool_size={pool_size})");
        Ok(Self { pool })
    }
}

const DOCUMENT_COLUMNS: &str = "id, project_id, filename, file_path, status, error_message, \
     summary, topics, suggested_questions, created_at, updated_at";

fn document_from_row(row: &PgRow) -> anyhow::Result<Document> {
    let status_text: String = row.get("status");
    let status = DocumentStatus::parse(&status_text)
        .ok_or_else(|| anyhow::anyhow!("unknown document status in database: {status_text}"))?;

    let topics: Option<serde_json::Value> = row.get("topics");
    let questions: Option<serde_json::Value> = row.get("suggested_questions");

    Ok(Document {
        id: row.get("id"),
        project_id: row.get("project_id"),
        filename: row.get("filename"),
        file_path: row.get("file_path"),
        status,
        error_message: row.get("error_message"),
        summary: row.get("summary"),
        topics: topics
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default(),
        suggested_questions: questions
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default(),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl Database for PostgresDatabase {
    async fn initialize(&self) -> anyhow::Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (
                id VARCHAR(64) PRIMARY KEY,
                project_id VARCHAR(255) NOT NULL,
                filename VARCHAR(1024) NOT NULL,
                file_path VARCHAR(1024) NOT NULL,
                status VARCHAR(16) NOT NULL DEFAULT 'pending',
                error_message TEXT,
                summary TEXT,
                topics JSONB,
                suggested_questions JSONB,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_project_id ON documents(project_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status)")
            .execute(&self.pool)
            .await?;

        info!("Database tables initialized");
        Ok(())
    }

    async fn insert_document(
        &self,
        id: &str,
        project_id: &str,
        filename: &str,
        file_path: &str,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO documents (id, project_id, filename, file_path, status)
             VALUES ($1, $2, $3, $4, 'pending')",
        )
        .bind(id)
        .bind(project_id)
        .bind(filename)
        .bind(file_path)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_document(&self, document_id: &str) -> anyhow::Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = $1"
        ))
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(document_from_row).transpose()
    }

    async fn list_documents(
        &self,
        project_id: &str,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<Document>> {
        let rows = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents
             WHERE project_id = $1
             ORDER BY created_at DESC
             LIMIT $2 OFFSET $3"
        ))
        .bind(project_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(document_from_row).collect()
    }

    async fn set_status(
        &self,
        document_id: &str,
        status: DocumentStatus,
        error_message: Option<&str>,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE documents
             SET status = $2, error_message = $3, updated_at = CURRENT_TIMESTAMP
             WHERE id = $1",
        )
        .bind(document_id)
        .bind(status.as_str())
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_briefing(
        &self,
        document_id: &str,
        summary: &str,
        topics: &[String],
        questions: &[String],
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE documents
             SET summary = $2, topics = $3, suggested_questions = $4,
                 updated_at = CURRENT_TIMESTAMP
             WHERE id = $1",
        )
        .bind(document_id)
        .bind(summary)
        .bind(serde_json::to_value(topics)?)
        .bind(serde_json::to_value(questions)?)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_document(&self, document_id: &str) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = $1")
            .bind(document_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_unfailed_documents(&self, min_age_secs: u64) -> anyhow::Result<Vec<Document>> {
        let rows = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents
             WHERE status != 'failed'
               AND created_at < NOW() - make_interval(secs => $1)
             ORDER BY created_at"
        ))
        .bind(min_age_secs as f64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(document_from_row).collect()
    }

    async fn list_stuck_documents(&self, older_than_secs: u64) -> anyhow::Result<Vec<Document>> {
        let rows = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents
             WHERE status IN ('pending', 'processing')
               AND created_at < NOW() - make_interval(secs => $1)
             ORDER BY created_at"
        ))
        .bind(older_than_secs as f64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(document_from_row).collect()
    }

    async fn mark_failed_batch(&self, ids: &[String], message: &str) -> anyhow::Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        // Single statement, so a crash mid-sweep never commits a partial batch.
        let result = sqlx::query(
            "UPDATE documents
             SET status = 'failed', error_message = $2, updated_at = CURRENT_TIMESTAMP
             WHERE id = ANY($1) AND status != 'failed'",
        )
        .bind(ids)
        .bind(message)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
