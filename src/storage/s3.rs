use async_trait::async_trait;
use aws_sdk_s3::Client;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::info;

use super::{Storage, StorageError};

/// AWS S3 storage backend.
pub struct S3Storage {
    client: Client,
    bucket: String,
    upload_semaphore: Arc<Semaphore>,
    region: String,
}

impl S3Storage {
    pub async fn new(
        aws_access_key: &str,
        aws_secret_key: &str,
        region: &str,
        bucket: &str,
        upload_concurrency: u32,
    ) -> Result<Self, StorageError> {
        let creds = aws_sdk_s3::config::Credentials::new(
            aws_access_key,
            aws_secret_key,
            None,
            None,
            "kbase",
        );

        let config = aws_sdk_s3::config::Builder::new()
            .region(aws_sdk_s3::config::Region::new(region.to_string()))
            .credentials_provider(creds)
            .build();

        let client = Client::from_conf(config);

        let storage = Self {
            client,
            bucket: bucket.to_string(),
            upload_semaphore: Arc::new(Semaphore::new(upload_concurrency.max(1) as usize)),
            region: region.to_string(),
        };
        storage.ensure_bucket().await?;
        info!("S3 storage initialized (bucket={bucket})");
        Ok(storage)
    }

    async fn ensure_bucket(&self) -> Result<(), StorageError> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => Ok(()),
            Err(_) => {
                let mut req = self.client.create_bucket().bucket(&self.bucket);
                if self.region != "us-east-1" {
                    let constraint = aws_sdk_s3::types::CreateBucketConfiguration::builder()
                        .location_constraint(aws_sdk_s3::types::BucketLocationConstraint::from(
                            self.region.as_str(),
                        ))
                        .build();
                    req = req.create_bucket_configuration(constraint);
                }
                req.send()
                    .await
                    .map_err(|e| StorageError::S3(format!("create bucket failed: {e}")))?;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Storage for S3Storage {
    async fn write(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let _permit = self
            .upload_semaphore
            .acquire()
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(aws_sdk_s3::primitives::ByteStream::from(data.to_vec()))
            .send()
            .await
            .map_err(|e| StorageError::S3(format!("put {key} failed: {e}")))?;
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let service_err = e.into_service_error();
                if service_err.is_no_such_key() {
                    StorageError::NotFound {
                        key: key.to_string(),
                    }
                } else {
                    StorageError::S3(format!("get {key} failed: {service_err}"))
                }
            })?;

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| StorageError::S3(format!("read body of {key} failed: {e}")))?;
        Ok(data.into_bytes().to_vec())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let service_err = e.into_service_error();
                if service_err.is_not_found() {
                    Ok(false)
                } else {
                    Err(StorageError::S3(format!("head {key} failed: {service_err}")))
                }
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        // S3 deletes are silently idempotent; head first so the caller can
        // distinguish "removed" from "was never there".
        let existed = self.exists(key).await?;
        if !existed {
            return Ok(false);
        }

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::S3(format!("delete {key} failed: {e}")))?;
        Ok(true)
    }

    fn provider_name(&self) -> &str {
        "aws-s3"
    }
}
