use std::sync::Arc;

use crate::config::Settings;
use crate::database::Database;
use crate::embedding::EmbeddingModel;
use crate::ingest::pipeline::IngestionPipeline;
use crate::ingest::tracker::TaskTracker;
use crate::storage::Storage;
use crate::vector_store::VectorStore;

/// Shared application state passed to all route handlers.
///
/// Constructed once at process start and injected everywhere; no component
/// reaches for global state.
pub struct AppState {
    pub settings: Settings,
    pub database: Arc<dyn Database>,
    pub storage: Arc<dyn Storage>,
    pub vector_store: Arc<dyn VectorStore>,
    pub embedding_model: Arc<dyn EmbeddingModel>,
    pub tracker: Arc<TaskTracker>,
    pub pipeline: Arc<IngestionPipeline>,
}
