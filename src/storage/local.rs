use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;

use super::{Storage, StorageError};

/// Local filesystem storage backend.
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub fn new(storage_path: &str) -> Self {
        let base_path = PathBuf::from(storage_path);
        // Ensure directory exists (best-effort at construction time).
        std::fs::create_dir_all(&base_path).ok();
        Self { base_path }
    }

    fn resolve_path(&self, key: &str) -> PathBuf {
        self.base_path.join(key)
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn write(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let path = self.resolve_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, data).await?;
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve_path(key);
        if !path.exists() {
            return Err(StorageError::NotFound {
                key: key.to_string(),
            });
        }
        Ok(fs::read(&path).await?)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.resolve_path(key).exists())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.resolve_path(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn provider_name(&self) -> &str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_write_read() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path().to_str().unwrap());

        let data = b"hello world";
        storage.write("proj/file.txt", data).await.unwrap();

        let read_back = storage.read("proj/file.txt").await.unwrap();
        assert_eq!(read_back, data);
    }

    #[tokio::test]
    async fn test_local_exists() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path().to_str().unwrap());

        assert!(!storage.exists("missing.bin").await.unwrap());
        storage.write("missing.bin", b"data").await.unwrap();
        assert!(storage.exists("missing.bin").await.unwrap());
    }

    #[tokio::test]
    async fn test_local_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path().to_str().unwrap());

        storage.write("del.txt", b"data").await.unwrap();
        assert!(storage.delete("del.txt").await.unwrap());
        assert!(!storage.delete("del.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_local_read_not_found() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path().to_str().unwrap());

        let result = storage.read("nonexistent.txt").await;
        assert!(matches!(result, Err(StorageError::NotFound { .. })));
    }
}
