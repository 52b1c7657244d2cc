pub mod local;
pub mod s3;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("file not found: {key}")]
    NotFound { key: String },
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("S3 error: {0}")]
    S3(String),
    #[error("{0}")]
    Other(String),
}

/// Abstract blob storage backend for uploaded document bytes.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Persist raw bytes at the given key, creating parent paths as needed.
    async fn write(&self, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Read stored bytes.
    async fn read(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Whether an object exists at the key.
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Delete an object. Returns false if it did not exist.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// Return the provider name for logging.
    fn provider_name(&self) -> &str;
}
