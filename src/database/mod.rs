pub mod postgres;

use async_trait::async_trait;

use crate::models::document::{Document, DocumentStatus};

/// Abstract metadata store for document rows. This is the record of truth:
/// a row exists before any processing begins, and every status transition
/// lands here before anything else observes it.
#[async_trait]
pub trait Database: Send + Sync {
    /// Initialize tables and indexes.
    async fn initialize(&self) -> anyhow::Result<()>;

    /// Insert a new document row with status PENDING (write-ahead step).
    async fn insert_document(
        &self,
        id: &str,
        project_id: &str,
        filename: &str,
        file_path: &str,
    ) -> anyhow::Result<()>;

    /// Fetch a document row by id.
    async fn get_document(&self, document_id: &str) -> anyhow::Result<Option<Document>>;

    /// List documents for a project, newest first.
    async fn list_documents(
        &self,
        project_id: &str,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<Document>>;

    /// Update status and error message in one transactional write.
    /// Returns false if the row no longer exists.
    async fn set_status(
        &self,
        document_id: &str,
        status: DocumentStatus,
        error_message: Option<&str>,
    ) -> anyhow::Result<bool>;

    /// Persist briefing annotations after READY.
    async fn set_briefing(
        &self,
        document_id: &str,
        summary: &str,
        topics: &[String],
        questions: &[String],
    ) -> anyhow::Result<bool>;

    /// Delete a document row. Returns false if it did not exist.
    async fn delete_document(&self, document_id: &str) -> anyhow::Result<bool>;

    /// Non-FAILED documents older than the grace window (corruption sweep input).
    async fn list_unfailed_documents(&self, min_age_secs: u64) -> anyhow::Result<Vec<Document>>;

    /// PENDING/PROCESSING documents older than the threshold (stuck rescue input).
    async fn list_stuck_documents(&self, older_than_secs: u64) -> anyhow::Result<Vec<Document>>;

    /// Flag a batch of documents FAILED in a single atomic statement.
    /// Already-FAILED rows are left untouched. Returns rows affected.
    async fn mark_failed_batch(&self, ids: &[String], message: &str) -> anyhow::Result<u64>;
}
