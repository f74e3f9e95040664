use crate::config::S3Config;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::Client as S3Client;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncRead;
use tracing::{debug, info, instrument};

/// Streaming reader over an object's content
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

/// Object store operation errors
#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("Failed to sign upload URL for {key}: {message}")]
    Presign { key: String, message: String },

    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("Failed to open {bucket}/{key}: {message}")]
    Read {
        bucket: String,
        key: String,
        message: String,
    },
}

/// Object storage operations used by the import service
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Sign a write-only URL for a single key in the upload bucket
    async fn presign_put(
        &self,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> Result<String, ObjectStoreError>;

    /// Open a streaming read of an object. The content is never buffered as
    /// a whole.
    async fn open_read(&self, bucket: &str, key: &str) -> Result<ObjectReader, ObjectStoreError>;
}

/// S3 gateway for the upload bucket
pub struct S3Gateway {
    client: S3Client,
    bucket: String,
}

impl S3Gateway {
    /// Create a new S3 gateway
    pub async fn new(config: &S3Config) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 gateway initialized"
        );

        Self::from_conf(s3_config_builder.build(), config.bucket.clone())
    }

    /// Create a gateway from a prepared client config
    pub fn from_conf(conf: aws_sdk_s3::Config, bucket: impl Into<String>) -> Self {
        Self {
            client: S3Client::from_conf(conf),
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3Gateway {
    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn presign_put(
        &self,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> Result<String, ObjectStoreError> {
        let presigning_config =
            PresigningConfig::expires_in(expires_in).map_err(|e| ObjectStoreError::Presign {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        let presigned = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .presigned(presigning_config)
            .await
            .map_err(|e| ObjectStoreError::Presign {
                key: key.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        debug!(key = %key, "Signed upload URL");

        Ok(presigned.uri().to_string())
    }

    #[instrument(skip(self))]
    async fn open_read(&self, bucket: &str, key: &str) -> Result<ObjectReader, ObjectStoreError> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().map(|e| e.is_no_such_key()).unwrap_or(false) {
                    ObjectStoreError::NotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    ObjectStoreError::Read {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                        message: DisplayErrorContext(&e).to_string(),
                    }
                }
            })?;

        debug!(
            content_length = ?output.content_length(),
            "Opened object stream"
        );

        Ok(Box::pin(output.body.into_async_read()))
    }
}

/// In-memory object store for tests and local runs
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object, as a client upload through a signed URL would
    pub fn put(&self, bucket: &str, key: &str, data: impl Into<Vec<u8>>) {
        self.objects
            .write()
            .insert((bucket.to_string(), key.to_string()), data.into());
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn presign_put(
        &self,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> Result<String, ObjectStoreError> {
        Ok(format!(
            "memory://upload/{key}?content-type={content_type}&expires={}",
            expires_in.as_secs()
        ))
    }

    async fn open_read(&self, bucket: &str, key: &str) -> Result<ObjectReader, ObjectStoreError> {
        let data = self
            .objects
            .read()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| ObjectStoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })?;

        Ok(Box::pin(std::io::Cursor::new(data)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_memory_store_streams_stored_object() {
        let store = MemoryObjectStore::new();
        store.put("bucket", "uploaded/a.csv", "id,title\n");

        let mut reader = store.open_read("bucket", "uploaded/a.csv").await.unwrap();
        let mut content = String::new();
        reader.read_to_string(&mut content).await.unwrap();

        assert_eq!(content, "id,title\n");
    }

    fn local_gateway() -> S3Gateway {
        let conf = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new("us-east-1"))
            .credentials_provider(aws_sdk_s3::config::Credentials::new(
                "AKIDEXAMPLE",
                "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
                None,
                None,
                "test",
            ))
            .endpoint_url("http://localhost:9000")
            .force_path_style(true)
            .build();
        S3Gateway::from_conf(conf, "catalog-imports")
    }

    fn query_param<'a>(url: &'a str, name: &str) -> Option<&'a str> {
        let (_, query) = url.split_once('?')?;
        query
            .split('&')
            .find_map(|pair| pair.strip_prefix(name)?.strip_prefix('='))
    }

    #[tokio::test]
    async fn test_s3_presigned_put_is_scoped_to_key_and_content_type() {
        let gateway = local_gateway();

        let url = gateway
            .presign_put("uploaded/products.csv", "text/csv", Duration::from_secs(300))
            .await
            .unwrap();

        let (location, _) = url.split_once('?').unwrap();
        assert_eq!(
            location,
            "http://localhost:9000/catalog-imports/uploaded/products.csv"
        );
        assert_eq!(query_param(&url, "X-Amz-Expires"), Some("300"));
        assert!(query_param(&url, "X-Amz-Signature").is_some());
        let signed_headers = query_param(&url, "X-Amz-SignedHeaders").unwrap();
        assert!(signed_headers.contains("content-type"));
        assert!(signed_headers.contains("host"));
    }

    #[tokio::test]
    async fn test_s3_presign_rejects_expiry_beyond_one_week() {
        let gateway = local_gateway();

        let result = gateway
            .presign_put(
                "uploaded/products.csv",
                "text/csv",
                Duration::from_secs(8 * 24 * 60 * 60),
            )
            .await;

        assert!(matches!(result, Err(ObjectStoreError::Presign { .. })));
    }

    #[tokio::test]
    async fn test_memory_store_missing_object() {
        let store = MemoryObjectStore::new();
        let result = store.open_read("bucket", "uploaded/missing.csv").await;
        assert!(matches!(result, Err(ObjectStoreError::NotFound { .. })));
    }
}
