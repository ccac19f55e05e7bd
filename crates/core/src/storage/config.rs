//! Storage settings consumed by the provider factory.

use std::path::PathBuf;

use filedrop_shared::config::DEFAULT_BASE_URL;
use filedrop_shared::{AppConfig, ProviderKind, S3Config, StorageConfig};

/// Settings for the local filesystem backend.
#[derive(Debug, Clone)]
pub struct LocalSettings {
    /// Directory every storage path is resolved against.
    pub root: PathBuf,
    /// Base URL used by `get_file_url`.
    pub base_url: String,
}

impl LocalSettings {
    /// Local settings rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Set the public base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self::new(std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }
}

/// Everything needed to construct a storage backend.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// Selected provider.
    pub provider: ProviderKind,
    /// S3 connection settings.
    pub s3: S3Config,
    /// Local backend settings, also used for the S3 fallback.
    pub local: LocalSettings,
    /// Maximum number of chunk parts uploaded to S3 at once.
    pub part_upload_concurrency: usize,
    /// Lifetime of presigned URLs in seconds.
    pub presign_ttl_secs: u64,
}

impl StorageSettings {
    /// Default S3 part upload concurrency.
    pub const DEFAULT_PART_UPLOAD_CONCURRENCY: usize = 4;
    /// Default presigned URL lifetime: 1 hour.
    pub const DEFAULT_PRESIGN_TTL: u64 = 3600;

    /// Local storage settings with defaults.
    #[must_use]
    pub fn local(local: LocalSettings) -> Self {
        Self {
            provider: ProviderKind::Local,
            s3: S3Config::default(),
            local,
            part_upload_concurrency: Self::DEFAULT_PART_UPLOAD_CONCURRENCY,
            presign_ttl_secs: Self::DEFAULT_PRESIGN_TTL,
        }
    }

    /// S3 storage settings. `local` is used if S3 cannot be constructed.
    #[must_use]
    pub fn s3(s3: S3Config, local: LocalSettings) -> Self {
        Self {
            provider: ProviderKind::S3,
            s3,
            ..Self::local(local)
        }
    }

    /// Build settings from the application configuration.
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        let mut local = LocalSettings::default().with_base_url(config.files.base_url.clone());
        if let Some(root) = &config.files.root {
            local.root.clone_from(root);
        }

        Self::local(local).with_storage_config(&config.storage)
    }

    /// Replace the provider section, keeping the local settings.
    #[must_use]
    pub fn with_storage_config(mut self, storage: &StorageConfig) -> Self {
        self.provider = storage.provider;
        self.s3 = storage.s3.clone();
        self.presign_ttl_secs = storage.presign_ttl_secs;
        self.with_part_upload_concurrency(storage.part_upload_concurrency)
    }

    /// Set part upload concurrency (clamped to at least 1).
    #[must_use]
    pub fn with_part_upload_concurrency(mut self, concurrency: usize) -> Self {
        self.part_upload_concurrency = concurrency.max(1);
        self
    }

    /// Set presigned URL lifetime.
    #[must_use]
    pub fn with_presign_ttl(mut self, secs: u64) -> Self {
        self.presign_ttl_secs = secs;
        self
    }
}
