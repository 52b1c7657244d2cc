//! In-memory fakes of the backend seams for pipeline and reconciler tests.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use crate::database::Database;
use crate::embedding::EmbeddingModel;
use crate::models::chunk::DocumentChunk;
use crate::models::document::{Document, DocumentStatus};
use crate::storage::{Storage, StorageError};
use crate::vector_store::VectorStore;

// ──────────────────────────── Database ────────────────────────────

#[derive(Default)]
pub struct MockDatabase {
    pub docs: Mutex<HashMap<String, Document>>,
}

impl MockDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn make_document(id: &str, project_id: &str, file_path: &str) -> Document {
        Document {
            id: id.to_string(),
            project_id: project_id.to_string(),
            filename: file_path.rsplit('/').next().unwrap_or(file_path).to_string(),
            file_path: file_path.to_string(),
            status: DocumentStatus::Pending,
            error_message: None,
            summary: None,
            topics: vec![],
            suggested_questions: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    pub fn seed(&self, doc: Document) {
        self.docs.lock().unwrap().insert(doc.id.clone(), doc);
    }

    /// Shift a row's created_at into the past for staleness tests.
    pub fn backdate(&self, id: &str, secs: i64) {
        if let Some(doc) = self.docs.lock().unwrap().get_mut(id) {
            doc.created_at -= ChronoDuration::seconds(secs);
        }
    }

    pub fn status_of(&self, id: &str) -> Option<DocumentStatus> {
        self.docs.lock().unwrap().get(id).map(|d| d.status)
    }

    pub fn error_of(&self, id: &str) -> Option<String> {
        self.docs
            .lock()
            .unwrap()
            .get(id)
            .and_then(|d| d.error_message.clone())
    }

    pub fn summary_of(&self, id: &str) -> Option<String> {
        self.docs.lock().unwrap().get(id).and_then(|d| d.summary.clone())
    }
}

#[async_trait]
impl Database for MockDatabase {
    async fn initialize(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn insert_document(
        &self,
        id: &str,
        project_id: &str,
        filename: &str,
        file_path: &str,
    ) -> anyhow::Result<()> {
        let mut doc = Self::make_document(id, project_id, file_path);
        doc.filename = filename.to_string();
        self.seed(doc);
        Ok(())
    }

    async fn get_document(&self, document_id: &str) -> anyhow::Result<Option<Document>> {
        Ok(self.docs.lock().unwrap().get(document_id).cloned())
    }

    async fn list_documents(
        &self,
        project_id: &str,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<Document>> {
        let mut docs: Vec<Document> = self
            .docs
            .lock()
            .unwrap()
            .values()
            .filter(|d| d.project_id == project_id)
            .cloned()
            .collect();
        docs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(docs
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn set_status(
        &self,
        document_id: &str,
        status: DocumentStatus,
        error_message: Option<&str>,
    ) -> anyhow::Result<bool> {
        let mut docs = self.docs.lock().unwrap();
        match docs.get_mut(document_id) {
            Some(doc) => {
                doc.status = status;
                doc.error_message = error_message.map(|s| s.to_string());
                doc.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_briefing(
        &self,
        document_id: &str,
        summary: &str,
        topics: &[String],
        questions: &[String],
    ) -> anyhow::Result<bool> {
        let mut docs = self.docs.lock().unwrap();
        match docs.get_mut(document_id) {
            Some(doc) => {
                doc.summary = Some(summary.to_string());
                doc.topics = topics.to_vec();
                doc.suggested_questions = questions.to_vec();
                doc.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_document(&self, document_id: &str) -> anyhow::Result<bool> {
        Ok(self.docs.lock().unwrap().remove(document_id).is_some())
    }

    async fn list_unfailed_documents(&self, min_age_secs: u64) -> anyhow::Result<Vec<Document>> {
        let cutoff = Utc::now() - ChronoDuration::seconds(min_age_secs as i64);
        Ok(self
            .docs
            .lock()
            .unwrap()
            .values()
            .filter(|d| d.status != DocumentStatus::Failed && d.created_at < cutoff)
            .cloned()
            .collect())
    }

    async fn list_stuck_documents(&self, older_than_secs: u64) -> anyhow::Result<Vec<Document>> {
        let cutoff = Utc::now() - ChronoDuration::seconds(older_than_secs as i64);
        Ok(self
            .docs
            .lock()
            .unwrap()
            .values()
            .filter(|d| {
                matches!(
                    d.status,
                    DocumentStatus::Pending | DocumentStatus::Processing
                ) && d.created_at < cutoff
            })
            .cloned()
            .collect())
    }

    async fn mark_failed_batch(&self, ids: &[String], message: &str) -> anyhow::Result<u64> {
        let mut docs = self.docs.lock().unwrap();
        let mut affected = 0;
        for id in ids {
            if let Some(doc) = docs.get_mut(id) {
                if doc.status != DocumentStatus::Failed {
                    doc.status = DocumentStatus::Failed;
                    doc.error_message = Some(message.to_string());
                    doc.updated_at = Utc::now();
                    affected += 1;
                }
            }
        }
        Ok(affected)
    }
}

// ──────────────────────────── Storage ────────────────────────────

#[derive(Default)]
pub struct MockStorage {
    pub files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, key: &str, data: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert(key.to_string(), data.to_vec());
    }
}

#[async_trait]
impl Storage for MockStorage {
    async fn write(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.seed(key, data);
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.files
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                key: key.to_string(),
            })
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.files.lock().unwrap().contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.files.lock().unwrap().remove(key).is_some())
    }

    fn provider_name(&self) -> &str {
        "mock"
    }
}

// ──────────────────────────── Vector store ────────────────────────────

#[derive(Default)]
pub struct MockVectorStore {
    pub chunks: Mutex<Vec<DocumentChunk>>,
    pub store_calls: AtomicU32,
    /// Number of upcoming store calls that fail before succeeding.
    pub fail_next: AtomicU32,
}

impl MockVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunks_for(&self, document_id: &str) -> Vec<DocumentChunk> {
        self.chunks
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.document_id == document_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl VectorStore for MockVectorStore {
    async fn initialize(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn store_embeddings(&self, chunks: &[DocumentChunk]) -> anyhow::Result<()> {
        self.store_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_next.load(Ordering::SeqCst) > 0 {
            self.fail_next.fetch_sub(1, Ordering::SeqCst);
            anyhow::bail!("vector store unavailable");
        }
        self.chunks.lock().unwrap().extend_from_slice(chunks);
        Ok(())
    }

    async fn query_similar(
        &self,
        _query_embedding: &[f32],
        k: usize,
        project_id: &str,
        _doc_ids: Option<&[String]>,
    ) -> anyhow::Result<Vec<DocumentChunk>> {
        Ok(self
            .chunks
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.project_id == project_id)
            .take(k)
            .cloned()
            .collect())
    }

    async fn delete_by_document_id(&self, document_id: &str) -> anyhow::Result<u64> {
        let mut chunks = self.chunks.lock().unwrap();
        let before = chunks.len();
        chunks.retain(|c| c.document_id != document_id);
        Ok((before - chunks.len()) as u64)
    }
}

// ──────────────────────────── Embedder ────────────────────────────

pub struct MockEmbedder {
    pub dimensions: u32,
    pub calls: AtomicU32,
    pub fail: AtomicBool,
    /// Artificial latency per call, for non-blocking-admission tests.
    pub delay_ms: AtomicU32,
}

impl MockEmbedder {
    pub fn new(dimensions: u32) -> Self {
        Self {
            dimensions,
            calls: AtomicU32::new(0),
            fail: AtomicBool::new(false),
            delay_ms: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl EmbeddingModel for MockEmbedder {
    async fn embed_for_ingestion(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay as u64)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("embedding backend exhausted");
        }
        Ok(texts
            .iter()
            .map(|t| vec![t.len() as f32; self.dimensions as usize])
            .collect())
    }

    async fn embed_for_query(&self, query: &str) -> anyhow::Result<Vec<f32>> {
        Ok(vec![query.len() as f32; self.dimensions as usize])
    }

    fn dimensions(&self) -> u32 {
        self.dimensions
    }
}
