//! S3 client implementation.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use aws_types::region::Region;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};

/// Byte-level access to the blob store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Download an object.
    async fn get(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Upload an object, replacing any existing one.
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> StorageResult<()>;
}

/// Configuration for the S3 client.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Bucket name
    pub bucket_name: String,
    /// AWS region
    pub region: String,
    /// Custom endpoint (MinIO, LocalStack, R2); path-style addressing is used when set
    pub endpoint_url: Option<String>,
    /// Static access key; the default credential chain is used when absent
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

impl StorageConfig {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self {
            bucket_name: std::env::var("S3_BUCKET_NAME")
                .ok()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| StorageError::config_error("S3_BUCKET_NAME not set"))?,
            region: std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            endpoint_url: std::env::var("S3_ENDPOINT_URL").ok().filter(|s| !s.is_empty()),
            access_key_id: std::env::var("AWS_ACCESS_KEY_ID").ok().filter(|s| !s.is_empty()),
            secret_access_key: std::env::var("AWS_SECRET_ACCESS_KEY")
                .ok()
                .filter(|s| !s.is_empty()),
        })
    }
}

/// S3 storage client.
#[derive(Clone)]
pub struct S3Client {
    client: Client,
    bucket: String,
}

impl S3Client {
    /// Create a new S3 client from configuration.
    pub async fn new(config: StorageConfig) -> StorageResult<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        if let (Some(key), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            loader =
                loader.credentials_provider(Credentials::new(key, secret, None, None, "clipzip"));
        }

        let shared = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        info!("S3 client initialized for bucket: {}", config.bucket_name);

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket_name,
        })
    }

    /// Create from environment variables.
    pub async fn from_env() -> StorageResult<Self> {
        Self::new(StorageConfig::from_env()?).await
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Upload bytes.
    pub async fn upload_bytes(
        &self,
        data: Vec<u8>,
        key: &str,
        content_type: &str,
    ) -> StorageResult<()> {
        validate_key(key)?;
        debug!("Uploading {} bytes to {}", data.len(), key);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| {
                classify(
                    key,
                    e.code(),
                    DisplayErrorContext(&e).to_string(),
                    StorageError::upload_failed,
                )
            })?;

        info!("Uploaded {}", key);
        Ok(())
    }

    /// Download object as bytes.
    pub async fn download_bytes(&self, key: &str) -> StorageResult<Vec<u8>> {
        validate_key(key)?;
        debug!("Downloading {}", key);

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                classify(
                    key,
                    e.code(),
                    DisplayErrorContext(&e).to_string(),
                    StorageError::download_failed,
                )
            })?;

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::download_failed(e.to_string()))?
            .into_bytes()
            .to_vec();

        info!("Read {} ({} bytes)", key, bytes.len());
        Ok(bytes)
    }

    /// Check connectivity by performing a head bucket operation.
    pub async fn check_connectivity(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| {
                StorageError::AwsSdk(format!(
                    "S3 connectivity check failed: {}",
                    DisplayErrorContext(&e)
                ))
            })?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.download_bytes(key).await
    }

    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> StorageResult<()> {
        self.upload_bytes(data, key, content_type).await
    }
}

/// Reject keys S3 would misinterpret.
fn validate_key(key: &str) -> StorageResult<()> {
    if key.trim().is_empty() || key.starts_with('/') || key.len() > 1024 {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Map an S3 error code to a permanent error, or wrap it as transient.
fn classify(
    key: &str,
    code: Option<&str>,
    detail: String,
    transient: fn(String) -> StorageError,
) -> StorageError {
    match code {
        Some("NoSuchKey") | Some("NotFound") | Some("NoSuchBucket") => StorageError::not_found(key),
        Some("AccessDenied") | Some("Forbidden") | Some("InvalidAccessKeyId")
        | Some("SignatureDoesNotMatch") => StorageError::access_denied(key),
        _ => transient(detail),
    }
}
