//! Long-term artifact storage
//!
//! Rendered files come back from the provider as short-lived URLs. The
//! [`ArtifactStore`] copies them into object storage under a stable key and
//! hands out links. [`StorageClient`] implements it on top of `object_store`,
//! so the same code runs against S3, a local directory or memory.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::{ObjectStore, WriteMultipart, path::Path as StoragePath};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{StorageConfig, StorageProvider};
use crate::projects::ProjectKind;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Write to '{key}' failed: {reason}")]
    WriteFailed { key: String, reason: String },

    #[error("Fetching source failed: {0}")]
    FetchFailed(String),

    #[error("Artifact of {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid storage configuration: {0}")]
    Config(String),

    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
}

/// Storage result type
pub type Result<T> = std::result::Result<T, StorageError>;

/// What was written by a copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub key: String,
    pub size: u64,
    pub etag: Option<String>,
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Fetch `source_url` and persist it under `key`. Overwriting is allowed.
    async fn copy_from_url(&self, key: &str, source_url: &str) -> Result<StoredArtifact>;

    /// Retrievable link for a stored key
    fn link(&self, key: &str) -> String;
}

/// `exports/{domain}/{project_id}/{epoch_millis}-{format}`
pub fn artifact_key(kind: ProjectKind, project_id: &str, epoch_millis: i64, format: &str) -> String {
    format!(
        "exports/{}/{}/{}-{}",
        kind.as_domain(),
        project_id,
        epoch_millis,
        format.to_ascii_lowercase()
    )
}

/// Part uploads allowed in flight per copy
const MAX_IN_FLIGHT_PARTS: usize = 4;

fn write_failed(key: &str, err: object_store::Error) -> StorageError {
    StorageError::WriteFailed {
        key: key.to_string(),
        reason: err.to_string(),
    }
}

async fn next_chunk(response: &mut reqwest::Response) -> Result<Option<Bytes>> {
    response
        .chunk()
        .await
        .map_err(|e| StorageError::FetchFailed(e.to_string()))
}

/// Storage client wrapping object_store
#[derive(Clone)]
pub struct StorageClient {
    store: Arc<dyn ObjectStore>,
    pub bucket: String,
    http: reqwest::Client,
    public_base_url: Option<String>,
    max_artifact_bytes: u64,
    copy_retries: u32,
    retry_backoff: Duration,
}

impl StorageClient {
    /// Create new storage client with any object_store backend
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        let defaults = StorageConfig::default();
        Self {
            store,
            bucket: bucket.into(),
            http: reqwest::Client::new(),
            public_base_url: None,
            max_artifact_bytes: defaults.max_artifact_bytes.as_u64(),
            copy_retries: defaults.copy_retries,
            retry_backoff: Duration::from_millis(500),
        }
    }

    /// Create in-memory storage for testing/development
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(object_store::memory::InMemory::new()),
            "exportbox-local",
        )
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        let store: Arc<dyn ObjectStore> = match config.provider {
            StorageProvider::Memory => Arc::new(object_store::memory::InMemory::new()),
            StorageProvider::Local => {
                let root = config
                    .root
                    .as_ref()
                    .ok_or_else(|| StorageError::Config("storage.root is required".into()))?;
                std::fs::create_dir_all(root).map_err(|e| StorageError::Config(e.to_string()))?;
                Arc::new(object_store::local::LocalFileSystem::new_with_prefix(root)?)
            }
            StorageProvider::S3 => {
                let mut builder = object_store::aws::AmazonS3Builder::new()
                    .with_bucket_name(&config.bucket);
                if let Some(region) = &config.region {
                    builder = builder.with_region(region);
                }
                if let Some(endpoint) = &config.endpoint {
                    builder = builder
                        .with_endpoint(endpoint)
                        .with_allow_http(endpoint.starts_with("http://"));
                }
                if let Some(key) = &config.access_key {
                    builder = builder.with_access_key_id(key);
                }
                if let Some(secret) = &config.secret_key {
                    builder = builder.with_secret_access_key(secret);
                }
                Arc::new(builder.build()?)
            }
        };

        info!(provider = ?config.provider, bucket = %config.bucket, "Artifact storage ready");

        Ok(Self {
            public_base_url: config
                .public_base_url
                .as_ref()
                .map(|url| url.trim_end_matches('/').to_string()),
            max_artifact_bytes: config.max_artifact_bytes.as_u64(),
            copy_retries: config.copy_retries,
            ..Self::new(store, config.bucket.clone())
        })
    }

    pub fn with_public_base_url(mut self, url: impl Into<String>) -> Self {
        self.public_base_url = Some(url.into().trim_end_matches('/').to_string());
        self
    }

    pub fn with_max_artifact_bytes(mut self, limit: u64) -> Self {
        self.max_artifact_bytes = limit;
        self
    }

    pub fn with_copy_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.copy_retries = retries;
        self.retry_backoff = backoff;
        self
    }

    /// Open the source, rejecting it early when its declared length is over the limit
    async fn open_source(&self, source_url: &str) -> Result<reqwest::Response> {
        let response = self
            .http
            .get(source_url)
            .send()
            .await
            .map_err(|e| StorageError::FetchFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::FetchFailed(format!(
                "HTTP {} from source",
                status.as_u16()
            )));
        }

        if let Some(length) = response.content_length() {
            if length > self.max_artifact_bytes {
                return Err(StorageError::TooLarge {
                    size: length,
                    limit: self.max_artifact_bytes,
                });
            }
        }
        debug!(length = ?response.content_length(), "Artifact source opened");
        Ok(response)
    }

    /// Feed source chunks into the upload, enforcing the size limit as they arrive
    async fn pump(
        &self,
        key: &str,
        response: &mut reqwest::Response,
        writer: &mut WriteMultipart,
    ) -> Result<u64> {
        let mut size = 0u64;
        while let Some(chunk) = next_chunk(response).await? {
            size += chunk.len() as u64;
            if size > self.max_artifact_bytes {
                return Err(StorageError::TooLarge {
                    size,
                    limit: self.max_artifact_bytes,
                });
            }
            writer
                .wait_for_capacity(MAX_IN_FLIGHT_PARTS)
                .await
                .map_err(|e| write_failed(key, e))?;
            writer.put(chunk);
        }
        Ok(size)
    }

    /// Stream the source into `key` as a multipart upload; memory holds at most
    /// the parts in flight, never the whole artifact
    async fn copy_once(&self, key: &str, source_url: &str) -> Result<StoredArtifact> {
        let mut response = self.open_source(source_url).await?;

        let upload = self
            .store
            .put_multipart(&StoragePath::from(key))
            .await
            .map_err(|e| write_failed(key, e))?;
        let mut writer = WriteMultipart::new(upload);

        match self.pump(key, &mut response, &mut writer).await {
            Ok(size) => {
                let put_result = writer.finish().await.map_err(|e| write_failed(key, e))?;
                info!(key, size, "Artifact copied to storage");
                Ok(StoredArtifact {
                    key: key.to_string(),
                    size,
                    etag: put_result.e_tag,
                })
            }
            Err(e) => {
                if let Err(abort_err) = writer.abort().await {
                    warn!(key, error = %abort_err, "Aborting partial upload failed");
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl ArtifactStore for StorageClient {
    async fn copy_from_url(&self, key: &str, source_url: &str) -> Result<StoredArtifact> {
        let mut attempt = 0;
        loop {
            match self.copy_once(key, source_url).await {
                Ok(stored) => return Ok(stored),
                Err(e @ StorageError::TooLarge { .. }) => return Err(e),
                Err(e) if attempt < self.copy_retries => {
                    attempt += 1;
                    warn!(key, attempt, error = %e, "Artifact copy failed, retrying");
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
                Err(e) => {
                    return Err(StorageError::WriteFailed {
                        key: key.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    fn link(&self, key: &str) -> String {
        match &self.public_base_url {
            Some(base) => format!("{}/{}", base, key),
            None => format!("s3://{}/{}", self.bucket, key),
        }
    }
}
