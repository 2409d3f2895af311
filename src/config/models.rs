use crate::humanize::{ByteSize, HumanDuration};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// HTTP intake and local data layout
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Root for the ledger, queue and project keyspaces
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: ByteSize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            data_dir: default_data_dir(),
            max_payload_bytes: default_max_payload_bytes(),
        }
    }
}

impl ServerConfig {
    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("ledger")
    }

    pub fn queue_path(&self) -> PathBuf {
        self.data_dir.join("queue")
    }

    pub fn projects_path(&self) -> PathBuf {
        self.data_dir.join("projects")
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_max_payload_bytes() -> ByteSize {
    ByteSize(5 * 1024 * 1024) // 5 MB
}

/// Queue consumer pool
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
    /// Per-worker channel capacity (backpressure bound)
    #[serde(default = "default_channel_size")]
    pub channel_size: usize,
    /// How often scheduled messages are checked for promotion
    #[serde(default = "default_promote_interval")]
    pub promote_interval: HumanDuration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            num_workers: default_num_workers(),
            channel_size: default_channel_size(),
            promote_interval: default_promote_interval(),
        }
    }
}

fn default_num_workers() -> usize {
    4
}

fn default_channel_size() -> usize {
    100
}

fn default_promote_interval() -> HumanDuration {
    HumanDuration::from_secs(1)
}

/// Render status polling budget; total wait is `interval * max_attempts`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollingConfig {
    #[serde(default = "default_poll_interval")]
    pub interval: HumanDuration,
    #[serde(default = "default_poll_max_attempts")]
    pub max_attempts: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: default_poll_interval(),
            max_attempts: default_poll_max_attempts(),
        }
    }
}

fn default_poll_interval() -> HumanDuration {
    HumanDuration::from_secs(5)
}

fn default_poll_max_attempts() -> u32 {
    60
}

/// How a batch item waits for its render
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchItemMode {
    /// Poll each item with the same budget as a single export
    #[default]
    Poll,
    /// One status read right after submission; anything but COMPLETED fails the item
    SingleCheck,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchConfig {
    /// Items processed at once; outcomes keep input order regardless
    #[serde(default = "default_batch_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub item_mode: BatchItemMode,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_batch_concurrency(),
            item_mode: BatchItemMode::default(),
        }
    }
}

fn default_batch_concurrency() -> usize {
    1
}

/// Queue-level redelivery of failed messages
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Deliveries allowed before a message is dead-lettered
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_delay")]
    pub base_delay: HumanDuration,
    #[serde(default = "default_retry_max_delay")]
    pub max_delay: HumanDuration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_max_attempts(),
            base_delay: default_retry_base_delay(),
            max_delay: default_retry_max_delay(),
        }
    }
}

fn default_retry_max_attempts() -> u32 {
    5
}

fn default_retry_base_delay() -> HumanDuration {
    HumanDuration::from_secs(30)
}

fn default_retry_max_delay() -> HumanDuration {
    HumanDuration::from_secs(30 * 60)
}

/// Render provider HTTP client
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_base_url")]
    pub base_url: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: HumanDuration,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: HumanDuration,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Bearer token (loaded from environment, not from config file)
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_provider_base_url(),
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
            user_agent: default_user_agent(),
            api_key: None,
        }
    }
}

fn default_provider_base_url() -> String {
    "http://localhost:9400".to_string()
}

fn default_connect_timeout() -> HumanDuration {
    HumanDuration::from_secs(10)
}

fn default_request_timeout() -> HumanDuration {
    HumanDuration::from_secs(30)
}

fn default_user_agent() -> String {
    format!("exportbox/{}", env!("CARGO_PKG_VERSION"))
}

/// Storage provider type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    #[default]
    Memory,
    Local,
    S3,
}

/// Artifact storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub provider: StorageProvider,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// Filesystem root for the `local` provider
    pub root: Option<PathBuf>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    /// Links are `{public_base_url}/{key}` when set, `s3://{bucket}/{key}` otherwise
    pub public_base_url: Option<String>,
    #[serde(default = "default_max_artifact_bytes")]
    pub max_artifact_bytes: ByteSize,
    /// Extra copy attempts after the first failure
    #[serde(default = "default_copy_retries")]
    pub copy_retries: u32,
    /// S3 access key (loaded from environment, not from config file)
    #[serde(skip)]
    pub access_key: Option<String>,
    /// S3 secret key (loaded from environment, not from config file)
    #[serde(skip)]
    pub secret_key: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: StorageProvider::default(),
            bucket: default_bucket(),
            root: None,
            region: None,
            endpoint: None,
            public_base_url: None,
            max_artifact_bytes: default_max_artifact_bytes(),
            copy_retries: default_copy_retries(),
            access_key: None,
            secret_key: None,
        }
    }
}

fn default_bucket() -> String {
    "exportbox-artifacts".to_string()
}

fn default_max_artifact_bytes() -> ByteSize {
    ByteSize(2 * 1024 * 1024 * 1024) // 2 GB
}

fn default_copy_retries() -> u32 {
    3
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub log_format: LogFormat,
}
