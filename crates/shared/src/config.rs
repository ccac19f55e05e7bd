//! Application configuration management.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// File serving configuration.
    #[serde(default)]
    pub files: FilesConfig,
    /// Storage backend configuration.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

/// File serving configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FilesConfig {
    /// Public base URL used when building file links.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Filesystem root for the local backend. Defaults to the working directory.
    #[serde(default)]
    pub root: Option<PathBuf>,
    /// Scratch directory for incoming `chunk-<n>` files.
    #[serde(default = "default_chunk_dir")]
    pub chunk_dir: PathBuf,
    /// Maximum request body size in bytes.
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            root: None,
            chunk_dir: default_chunk_dir(),
            max_body_size: default_max_body_size(),
        }
    }
}

/// Development default for the public base URL.
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_chunk_dir() -> PathBuf {
    PathBuf::from("tmp/chunks")
}

fn default_max_body_size() -> usize {
    1024 * 1024 * 1024 // 1 GiB
}

/// Which storage backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Local filesystem.
    #[default]
    Local,
    /// S3-compatible object store.
    S3,
}

impl ProviderKind {
    /// Provider name as stored in settings.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::S3 => "s3",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Storage backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Selected provider.
    #[serde(default)]
    pub provider: ProviderKind,
    /// S3 connection settings, read only when `provider = "s3"`.
    #[serde(default)]
    pub s3: S3Config,
    /// Maximum number of chunk parts uploaded to S3 at once.
    #[serde(default = "default_part_upload_concurrency")]
    pub part_upload_concurrency: usize,
    /// Lifetime of presigned URLs in seconds.
    #[serde(default = "default_presign_ttl_secs")]
    pub presign_ttl_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            s3: S3Config::default(),
            part_upload_concurrency: default_part_upload_concurrency(),
            presign_ttl_secs: default_presign_ttl_secs(),
        }
    }
}

fn default_part_upload_concurrency() -> usize {
    4
}

fn default_presign_ttl_secs() -> u64 {
    3600 // 1 hour
}

/// S3-compatible connection settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct S3Config {
    /// Bucket name.
    #[serde(default)]
    pub bucket: String,
    /// Region.
    #[serde(default)]
    pub region: String,
    /// Access key ID.
    #[serde(default)]
    pub access_key_id: String,
    /// Secret access key.
    #[serde(default)]
    pub secret_access_key: String,
    /// Custom endpoint (MinIO, R2, Spaces...).
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Use path-style addressing (`endpoint/bucket/key`).
    #[serde(default)]
    pub force_path_style: bool,
}

impl S3Config {
    /// Names of required fields that are empty.
    #[must_use]
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("bucket", &self.bucket),
            ("region", &self.region),
            ("access_key_id", &self.access_key_id),
            ("secret_access_key", &self.secret_access_key),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }
}

impl AppConfig {
    /// Loads configuration from environment and config files.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded.
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(config::Environment::with_prefix("FILEDROP").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}
