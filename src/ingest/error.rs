use std::time::Duration;
use thiserror::Error;

use crate::parser::ParseError;

/// Errors raised inside the ingestion pipeline.
///
/// The split between transient and permanent drives retry behavior:
/// transient errors are retried with backoff, permanent errors fail the
/// document immediately.
#[derive(Debug, Error)]
pub enum IngestError {
    // Permanent content errors.
    #[error("failed to parse document: {0}")]
    Parse(#[from] ParseError),
    #[error("stored file missing at {0}")]
    FileMissing(String),
    #[error("document row not found: {0}")]
    DocumentMissing(String),

    // Transient infrastructure errors.
    #[error("metadata store error: {0}")]
    Database(#[source] anyhow::Error),
    #[error("vector store error: {0}")]
    VectorStore(#[source] anyhow::Error),
    #[error("embedding error: {0}")]
    Embedding(#[source] anyhow::Error),
    #[error("storage error: {0}")]
    Storage(#[source] crate::storage::StorageError),
    #[error("step timed out after {0:?}")]
    Timeout(Duration),
    #[error("circuit breaker '{0}' is open")]
    BreakerOpen(&'static str),
}

impl IngestError {
    /// Transient errors are eligible for retry/backoff; permanent errors
    /// short-circuit to FAILED.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Parse(_) | Self::FileMissing(_) | Self::DocumentMissing(_) => false,
            Self::Database(_)
            | Self::VectorStore(_)
            | Self::Embedding(_)
            | Self::Storage(_)
            | Self::Timeout(_)
            | Self::BreakerOpen(_) => true,
        }
    }
}
