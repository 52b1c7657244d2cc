mod app;
mod completion;
mod config;
mod database;
mod embedding;
mod ingest;
mod models;
mod parser;
mod routes;
mod storage;
mod vector_store;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use app::AppState;
use completion::openai::OpenAICompletionModel;
use config::load_settings_from_path;
use database::Database;
use database::postgres::PostgresDatabase;
use embedding::openai::OpenAIEmbeddingModel;
use ingest::breaker::CircuitBreaker;
use ingest::briefing::BriefingGenerator;
use ingest::pipeline::IngestionPipeline;
use ingest::reconciler::ConsistencyReconciler;
use ingest::retry::RetryPolicy;
use ingest::tracker::TaskTracker;
use parser::Parser;
use storage::Storage;
use storage::local::LocalStorage;
use storage::s3::S3Storage;
use vector_store::VectorStore;
use vector_store::pgvector::PgVectorStore;

/// Upload tasks kept in memory before the oldest terminal entries are
/// evicted.
const TRACKER_CAPACITY: usize = 10_000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting kbase server...");

    // Load configuration.
    let settings = load_settings_from_path("kbase.toml")?;
    info!(
        "Configuration loaded: environment={}, host={}, port={}",
        settings.environment, settings.host, settings.port
    );

    // Initialize metadata store.
    let database: Arc<dyn database::Database> = Arc::new(
        PostgresDatabase::new(&settings.postgres_uri, settings.db_pool_size).await?,
    );
    database.initialize().await?;
    info!("Metadata store initialized");

    // Initialize blob storage.
    let blob_storage: Arc<dyn storage::Storage> = match settings.storage_provider.as_str() {
        "aws-s3" => {
            let s3 = S3Storage::new(
                settings.aws_access_key.as_deref().unwrap_or(""),
                settings.aws_secret_access_key.as_deref().unwrap_or(""),
                settings.aws_region.as_deref().unwrap_or("us-east-2"),
                settings.s3_bucket.as_deref().unwrap_or("kbase-storage"),
                settings.s3_upload_concurrency,
            )
            .await?;
            Arc::new(s3)
        }
        _ => Arc::new(LocalStorage::new(&settings.storage_path)),
    };
    info!("Storage initialized: {}", blob_storage.provider_name());

    // Initialize vector store.
    let vector_store: Arc<dyn vector_store::VectorStore> = Arc::new(
        PgVectorStore::new(
            &settings.postgres_uri,
            settings.db_pool_size,
            settings.vector_dimensions,
        )
        .await?,
    );
    vector_store.initialize().await?;
    info!("Vector store initialized");

    // Initialize embedding model.
    let embedding_model: Arc<dyn embedding::EmbeddingModel> = Arc::new(OpenAIEmbeddingModel::new(
        &settings.embedding_model,
        &settings.openai_api_key,
        settings.vector_dimensions,
    ));
    info!("Embedding model initialized: {}", settings.embedding_model);

    // Briefing generator (optional).
    let briefing = if settings.briefing_enabled {
        let completion_model: Arc<dyn completion::CompletionModel> =
            Arc::new(OpenAICompletionModel::new(
                &settings.completion_model,
                &settings.openai_api_key,
                settings.default_max_tokens,
                settings.default_temperature,
            ));
        info!("Briefing model initialized: {}", settings.completion_model);
        Some(BriefingGenerator::new(
            completion_model,
            settings.briefing_max_input_chars,
        ))
    } else {
        None
    };

    // Ingestion pipeline and its collaborators.
    let tracker = Arc::new(TaskTracker::new(TRACKER_CAPACITY));
    let retry = RetryPolicy::new(
        settings.max_retries,
        Duration::from_millis(settings.retry_base_delay_ms),
    );
    let db_breaker = CircuitBreaker::new(
        "metadata",
        settings.breaker_failure_threshold,
        Duration::from_millis(settings.breaker_recovery_timeout_ms),
        settings.breaker_success_threshold,
    );
    let vector_breaker = CircuitBreaker::new(
        "vector",
        settings.breaker_failure_threshold,
        Duration::from_millis(settings.breaker_recovery_timeout_ms),
        settings.breaker_success_threshold,
    );

    let pipeline = Arc::new(IngestionPipeline::new(
        database.clone(),
        blob_storage.clone(),
        vector_store.clone(),
        embedding_model.clone(),
        Parser::new(settings.chunk_size, settings.chunk_overlap),
        tracker.clone(),
        briefing,
        db_breaker,
        vector_breaker,
        retry,
        Duration::from_secs(settings.step_timeout_secs),
        settings.max_concurrent_jobs,
    ));

    // Reconcile before accepting traffic: rows whose jobs died with the
    // previous process become FAILED instead of staying stuck forever.
    let reconciler = Arc::new(ConsistencyReconciler::new(
        database.clone(),
        blob_storage.clone(),
        Duration::from_secs(settings.stale_age_secs),
        Duration::from_secs(settings.sweep_grace_secs),
    ));
    reconciler.run_startup().await?;
    let _sweep_handle = reconciler
        .clone()
        .spawn_periodic_sweep(Duration::from_secs(settings.sweep_interval_secs));

    // Build application state.
    let state = Arc::new(AppState {
        settings: settings.clone(),
        database,
        storage: blob_storage,
        vector_store,
        embedding_model,
        tracker,
        pipeline,
    });

    // Build router.
    let app = routes::build_router(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Start server.
    let addr: SocketAddr = format!("{}:{}", settings.host, settings.port).parse()?;
    info!("Listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
