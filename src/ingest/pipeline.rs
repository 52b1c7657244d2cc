use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::breaker::{BreakerError, CircuitBreaker};
use super::briefing::BriefingGenerator;
use super::error::IngestError;
use super::retry::RetryPolicy;
use super::tracker::TaskTracker;
use crate::database::Database;
use crate::embedding::EmbeddingModel;
use crate::models::chunk::DocumentChunk;
use crate::models::document::DocumentStatus;
use crate::parser::Parser;
use crate::storage::{Storage, StorageError};
use crate::vector_store::VectorStore;

/// Orchestrates the background path of an upload: read bytes, chunk, embed,
/// persist vectors, and drive the document status machine
/// PENDING → PROCESSING → READY | FAILED.
///
/// Jobs run detached from the admission request; a semaphore bounds how many
/// are in flight so embedding and vector-store backends are never flooded.
pub struct IngestionPipeline {
    database: Arc<dyn Database>,
    storage: Arc<dyn Storage>,
    vector_store: Arc<dyn VectorStore>,
    embedding_model: Arc<dyn EmbeddingModel>,
    parser: Parser,
    tracker: Arc<TaskTracker>,
    briefing: Option<BriefingGenerator>,
    db_breaker: CircuitBreaker,
    vector_breaker: CircuitBreaker,
    retry: RetryPolicy,
    step_timeout: Duration,
    jobs: Arc<Semaphore>,
}

impl IngestionPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        database: Arc<dyn Database>,
        storage: Arc<dyn Storage>,
        vector_store: Arc<dyn VectorStore>,
        embedding_model: Arc<dyn EmbeddingModel>,
        parser: Parser,
        tracker: Arc<TaskTracker>,
        briefing: Option<BriefingGenerator>,
        db_breaker: CircuitBreaker,
        vector_breaker: CircuitBreaker,
        retry: RetryPolicy,
        step_timeout: Duration,
        max_concurrent_jobs: u32,
    ) -> Self {
        Self {
            database,
            storage,
            vector_store,
            embedding_model,
            parser,
            tracker,
            briefing,
            db_breaker,
            vector_breaker,
            retry,
            step_timeout,
            jobs: Arc::new(Semaphore::new(max_concurrent_jobs.max(1) as usize)),
        }
    }

    /// Submit a detached ingestion job for an admitted document.
    ///
    /// Returns the handle so the scheduling boundary is visible; the
    /// admission caller discards it and never awaits the job.
    pub fn spawn(self: Arc<Self>, document_id: String, task_id: String) -> JoinHandle<()> {
        tokio::spawn(async move {
            let permit = self.jobs.clone().acquire_owned().await;
            if permit.is_err() {
                // Semaphore closed: process is shutting down.
                return;
            }
            let _permit = permit;
            let _ = self.run(&document_id, &task_id).await;
        })
    }

    /// Run the full pipeline for one document. Any error is recorded on the
    /// document row and the upload task before it is returned.
    pub async fn run(&self, document_id: &str, task_id: &str) -> Result<(), IngestError> {
        match self.process(document_id, task_id).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.record_failure(document_id, task_id, &err).await;
                Err(err)
            }
        }
    }

    async fn process(&self, document_id: &str, task_id: &str) -> Result<(), IngestError> {
        // 1. Mark PROCESSING first so readers observe the transition.
        let updated = self
            .db_step(move || {
                self.database
                    .set_status(document_id, DocumentStatus::Processing, None)
            })
            .await?;
        if !updated {
            return Err(IngestError::DocumentMissing(document_id.to_string()));
        }

        let doc = self
            .db_step(move || self.database.get_document(document_id))
            .await?
            .ok_or_else(|| IngestError::DocumentMissing(document_id.to_string()))?;

        // 2. Read and decode the stored bytes. Content errors are permanent
        //    and short-circuit before any embedding work.
        self.tracker.update_progress(task_id, 25, "parsing");
        let bytes = self.read_step(&doc.file_path).await?;
        let text = self.parser.extract_text(&bytes, &doc.filename)?;

        // 3. Chunk deterministically.
        self.tracker.update_progress(task_id, 40, "chunking");
        let chunks = self.parser.chunk_text(&text);

        if chunks.is_empty() {
            // Empty documents resolve READY with zero chunks; the vector
            // upsert is skipped entirely.
            self.db_step(move || {
                self.database
                    .set_status(document_id, DocumentStatus::Ready, None)
            })
            .await?;
            self.tracker.complete(task_id, document_id);
            info!("Document {document_id} ingested with 0 chunks");
            return Ok(());
        }

        // 4. Embed all chunks. A failure here aborts the document before
        //    anything reaches the vector store.
        self.tracker.update_progress(task_id, 60, "embedding");
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = self.embed_step(&texts).await?;
        if embeddings.len() != chunks.len() {
            return Err(IngestError::Embedding(anyhow::anyhow!(
                "expected {} embeddings, got {}",
                chunks.len(),
                embeddings.len()
            )));
        }

        let doc_chunks: Vec<DocumentChunk> = chunks
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(i, (chunk, embedding))| {
                chunk.into_document_chunk(
                    document_id.to_string(),
                    doc.project_id.clone(),
                    i as i32,
                    embedding,
                )
            })
            .collect();

        // 5. Upsert the whole chunk set in one batch.
        self.tracker.update_progress(task_id, 80, "storing");
        let chunk_batch = &doc_chunks;
        self.vector_step(move || self.vector_store.store_embeddings(chunk_batch))
            .await?;

        // 6. Terminal success.
        self.tracker.update_progress(task_id, 95, "finalizing");
        self.db_step(move || {
            self.database
                .set_status(document_id, DocumentStatus::Ready, None)
        })
        .await?;
        self.tracker.complete(task_id, document_id);
        info!(
            "Document {document_id} ingested with {} chunks",
            doc_chunks.len()
        );

        // 7. Best-effort briefing; failure never flips the document back.
        if let Some(generator) = &self.briefing {
            let briefing = generator.generate(&doc.filename, &text).await;
            if let Err(e) = self
                .database
                .set_briefing(
                    document_id,
                    &briefing.summary,
                    &briefing.key_topics,
                    &briefing.suggested_questions,
                )
                .await
            {
                warn!("Failed to persist briefing for {document_id}: {e}");
            }
        }

        Ok(())
    }

    /// Record FAILED on the document row and the upload task. The message
    /// is the human-readable error summary, never a stack trace.
    async fn record_failure(&self, document_id: &str, task_id: &str, err: &IngestError) {
        let message = err.to_string();
        error!("Ingestion failed for document {document_id}: {message}");

        let msg = message.as_str();
        let result = self
            .db_step(move || {
                self.database
                    .set_status(document_id, DocumentStatus::Failed, Some(msg))
            })
            .await;
        if let Err(e) = result {
            // The reconciler will catch this row on the next sweep.
            error!("Could not record FAILED status for {document_id}: {e}");
        }

        self.tracker.fail(task_id, &message);
    }

    // ─── Step wrappers: breaker + per-attempt deadline + retry ─────────

    async fn db_step<T, F, Fut>(&self, f: F) -> Result<T, IngestError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let f = &f;
        self.retry
            .run(move || async move {
                match tokio::time::timeout(self.step_timeout, self.db_breaker.call(f())).await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(BreakerError::Open(name))) => Err(IngestError::BreakerOpen(name)),
                    Ok(Err(BreakerError::Inner(e))) => Err(IngestError::Database(e)),
                    Err(_) => Err(IngestError::Timeout(self.step_timeout)),
                }
            })
            .await
    }

    async fn vector_step<T, F, Fut>(&self, f: F) -> Result<T, IngestError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let f = &f;
        self.retry
            .run(move || async move {
                match tokio::time::timeout(self.step_timeout, self.vector_breaker.call(f())).await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(BreakerError::Open(name))) => Err(IngestError::BreakerOpen(name)),
                    Ok(Err(BreakerError::Inner(e))) => Err(IngestError::VectorStore(e)),
                    Err(_) => Err(IngestError::Timeout(self.step_timeout)),
                }
            })
            .await
    }

    async fn embed_step(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, IngestError> {
        self.retry
            .run(move || async move {
                match tokio::time::timeout(
                    self.step_timeout,
                    self.embedding_model.embed_for_ingestion(texts),
                )
                .await
                {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(IngestError::Embedding(e)),
                    Err(_) => Err(IngestError::Timeout(self.step_timeout)),
                }
            })
            .await
    }

    async fn read_step(&self, file_path: &str) -> Result<Vec<u8>, IngestError> {
        self.retry
            .run(move || async move {
                match tokio::time::timeout(self.step_timeout, self.storage.read(file_path)).await {
                    Ok(Ok(bytes)) => Ok(bytes),
                    Ok(Err(StorageError::NotFound { key })) => Err(IngestError::FileMissing(key)),
                    Ok(Err(e)) => Err(IngestError::Storage(e)),
                    Err(_) => Err(IngestError::Timeout(self.step_timeout)),
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{CompletionModel, CompletionResult, Message};
    use crate::ingest::testutil::{MockDatabase, MockEmbedder, MockStorage, MockVectorStore};
    use crate::ingest::tracker::TaskStatus;
    use async_trait::async_trait;
    use std::sync::atomic::Ordering;

    struct FailingCompletion;

    #[async_trait]
    impl CompletionModel for FailingCompletion {
        async fn complete(
            &self,
            _messages: &[Message],
            _max_tokens: Option<u32>,
            _temperature: Option<f64>,
        ) -> anyhow::Result<CompletionResult> {
            anyhow::bail!("completion service down")
        }
    }

    struct Fixture {
        database: Arc<MockDatabase>,
        storage: Arc<MockStorage>,
        vector_store: Arc<MockVectorStore>,
        embedder: Arc<MockEmbedder>,
        tracker: Arc<TaskTracker>,
        pipeline: Arc<IngestionPipeline>,
    }

    fn fixture(briefing: Option<BriefingGenerator>) -> Fixture {
        let database = Arc::new(MockDatabase::new());
        let storage = Arc::new(MockStorage::new());
        let vector_store = Arc::new(MockVectorStore::new());
        let embedder = Arc::new(MockEmbedder::new(4));
        let tracker = Arc::new(TaskTracker::new(100));

        let pipeline = Arc::new(IngestionPipeline::new(
            database.clone(),
            storage.clone(),
            vector_store.clone(),
            embedder.clone(),
            Parser::new(100, 10),
            tracker.clone(),
            briefing,
            CircuitBreaker::new("metadata", 100, Duration::from_millis(10), 1),
            CircuitBreaker::new("vector", 100, Duration::from_millis(10), 1),
            RetryPolicy::new(3, Duration::from_millis(1)),
            Duration::from_secs(5),
            4,
        ));

        Fixture {
            database,
            storage,
            vector_store,
            embedder,
            tracker,
            pipeline,
        }
    }

    fn admit(f: &Fixture, doc_id: &str, task_id: &str, file_path: &str, content: &[u8]) {
        f.database
            .seed(MockDatabase::make_document(doc_id, "proj-a", file_path));
        f.storage.seed(file_path, content);
        f.tracker.insert(task_id, 10, "saving");
    }

    #[tokio::test]
    async fn test_success_path_reaches_ready() {
        let f = fixture(None);
        admit(&f, "d1", "t1", "proj-a/notes.txt", b"some text to ingest");

        f.pipeline.run("d1", "t1").await.unwrap();

        assert_eq!(f.database.status_of("d1"), Some(DocumentStatus::Ready));
        assert_eq!(f.database.error_of("d1"), None);

        let task = f.tracker.get("t1").unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.progress, 100);
        assert_eq!(task.doc_id.as_deref(), Some("d1"));

        let chunks = f.vector_store.chunks_for("d1");
        assert!(!chunks.is_empty());
        assert!(chunks.iter().enumerate().all(|(i, c)| c.position == i as i32));
        assert!(chunks.iter().all(|c| c.project_id == "proj-a"));
    }

    #[tokio::test]
    async fn test_parse_failure_short_circuits_before_embedding() {
        let f = fixture(None);
        admit(&f, "d1", "t1", "proj-a/image.png", &[0x89, 0x50, 0x4e]);

        let err = f.pipeline.run("d1", "t1").await.unwrap_err();
        assert!(matches!(err, IngestError::Parse(_)));

        // Neither the embedder nor the vector store was ever invoked.
        assert_eq!(f.embedder.calls.load(Ordering::SeqCst), 0);
        assert_eq!(f.vector_store.store_calls.load(Ordering::SeqCst), 0);

        assert_eq!(f.database.status_of("d1"), Some(DocumentStatus::Failed));
        assert!(f.database.error_of("d1").unwrap().contains("parse"));
        let task = f.tracker.get("t1").unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.is_some());
    }

    #[tokio::test]
    async fn test_embedding_failure_leaves_vector_store_untouched() {
        let f = fixture(None);
        admit(&f, "d1", "t1", "proj-a/notes.txt", b"content to embed");
        f.embedder.fail.store(true, Ordering::SeqCst);

        let err = f.pipeline.run("d1", "t1").await.unwrap_err();
        assert!(matches!(err, IngestError::Embedding(_)));

        // All-or-nothing: no partial chunk set for a FAILED document.
        assert_eq!(f.vector_store.store_calls.load(Ordering::SeqCst), 0);
        assert!(f.vector_store.chunks_for("d1").is_empty());
        assert_eq!(f.database.status_of("d1"), Some(DocumentStatus::Failed));
        assert!(!f.tracker.get("t1").unwrap().error.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_document_is_ready_with_zero_chunks() {
        let f = fixture(None);
        admit(&f, "d1", "t1", "proj-a/empty.txt", b"");

        f.pipeline.run("d1", "t1").await.unwrap();

        assert_eq!(f.database.status_of("d1"), Some(DocumentStatus::Ready));
        // The upsert was skipped entirely, not called with an empty batch.
        assert_eq!(f.vector_store.store_calls.load(Ordering::SeqCst), 0);
        assert_eq!(f.tracker.get("t1").unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_transient_vector_failure_is_retried() {
        let f = fixture(None);
        admit(&f, "d1", "t1", "proj-a/notes.txt", b"retry me please");
        f.vector_store.fail_next.store(2, Ordering::SeqCst);

        f.pipeline.run("d1", "t1").await.unwrap();

        assert_eq!(f.vector_store.store_calls.load(Ordering::SeqCst), 3);
        assert_eq!(f.database.status_of("d1"), Some(DocumentStatus::Ready));
    }

    #[tokio::test]
    async fn test_deleted_document_fails_without_processing() {
        let f = fixture(None);
        f.tracker.insert("t1", 10, "saving");

        let err = f.pipeline.run("missing", "t1").await.unwrap_err();
        assert!(matches!(err, IngestError::DocumentMissing(_)));
        assert_eq!(f.embedder.calls.load(Ordering::SeqCst), 0);
        assert_eq!(f.tracker.get("t1").unwrap().status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_briefing_failure_keeps_document_ready() {
        let briefing = BriefingGenerator::new(Arc::new(FailingCompletion), 1000);
        let f = fixture(Some(briefing));
        admit(&f, "d1", "t1", "proj-a/notes.txt", b"briefing source text");

        f.pipeline.run("d1", "t1").await.unwrap();

        // Degraded, not failed: the fallback summary is persisted.
        assert_eq!(f.database.status_of("d1"), Some(DocumentStatus::Ready));
        let summary = f.database.summary_of("d1").unwrap();
        assert!(summary.contains("unavailable"));
    }

    #[tokio::test]
    async fn test_spawn_returns_before_the_job_finishes() {
        let f = fixture(None);
        admit(&f, "d1", "t1", "proj-a/slow.txt", b"slow embedding ahead");
        f.embedder.delay_ms.store(200, Ordering::SeqCst);

        let started = std::time::Instant::now();
        let handle = f.pipeline.clone().spawn("d1".to_string(), "t1".to_string());
        assert!(started.elapsed() < Duration::from_millis(50));

        // The task remains pollable while the job is in flight.
        assert!(f.tracker.get("t1").is_some());

        handle.await.unwrap();
        assert_eq!(f.database.status_of("d1"), Some(DocumentStatus::Ready));
    }

    #[tokio::test]
    async fn test_file_missing_is_permanent_failure() {
        let f = fixture(None);
        f.database
            .seed(MockDatabase::make_document("d1", "proj-a", "proj-a/gone.txt"));
        f.tracker.insert("t1", 10, "saving");

        let err = f.pipeline.run("d1", "t1").await.unwrap_err();
        assert!(matches!(err, IngestError::FileMissing(_)));
        assert_eq!(f.database.status_of("d1"), Some(DocumentStatus::Failed));
        assert_eq!(f.embedder.calls.load(Ordering::SeqCst), 0);
    }
}
