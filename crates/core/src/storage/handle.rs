//! Lazily resolved, resettable storage handle.

use std::sync::{Arc, PoisonError, RwLock as StdRwLock};

use tokio::sync::RwLock;
use tracing::info;

use super::config::StorageSettings;
use super::error::StorageError;
use super::provider::Storage;

/// Where the handle reads storage settings from.
///
/// Implemented by whatever owns the settings at runtime (a settings table,
/// an admin-editable store, or fixed configuration).
pub trait SettingsSource: Send + Sync {
    /// Current storage settings.
    fn storage_settings(
        &self,
    ) -> impl std::future::Future<Output = Result<StorageSettings, StorageError>> + Send;
}

/// Settings fixed at startup.
#[derive(Debug, Clone)]
pub struct StaticSettings(pub StorageSettings);

impl SettingsSource for StaticSettings {
    async fn storage_settings(&self) -> Result<StorageSettings, StorageError> {
        Ok(self.0.clone())
    }
}

/// In-memory settings that can be replaced at runtime.
#[derive(Debug)]
pub struct SharedSettings {
    inner: StdRwLock<StorageSettings>,
}

impl SharedSettings {
    /// Start from `settings`.
    #[must_use]
    pub fn new(settings: StorageSettings) -> Self {
        Self {
            inner: StdRwLock::new(settings),
        }
    }

    /// Copy of the current settings.
    #[must_use]
    pub fn current(&self) -> StorageSettings {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the settings. Takes effect on the next handle resolution.
    pub fn replace(&self, settings: StorageSettings) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = settings;
    }
}

impl SettingsSource for SharedSettings {
    async fn storage_settings(&self) -> Result<StorageSettings, StorageError> {
        Ok(self.current())
    }
}

/// Resolves the configured [`Storage`] once and hands out shared references.
///
/// Callers that obtained a backend before [`reset`](Self::reset) keep using
/// it until they drop their `Arc`; in-flight uploads on it are unaffected.
pub struct StorageHandle<S: SettingsSource> {
    source: S,
    current: RwLock<Option<Arc<Storage>>>,
}

impl<S: SettingsSource> StorageHandle<S> {
    /// Create an unresolved handle.
    #[must_use]
    pub fn new(source: S) -> Self {
        Self {
            source,
            current: RwLock::new(None),
        }
    }

    /// The settings source.
    #[must_use]
    pub fn source(&self) -> &S {
        &self.source
    }

    /// The active backend, resolving it on first use.
    ///
    /// # Errors
    ///
    /// Fails if the settings cannot be read or local storage cannot be built.
    /// A broken S3 configuration falls back to local storage instead.
    pub async fn get(&self) -> Result<Arc<Storage>, StorageError> {
        if let Some(storage) = self.current.read().await.as_ref() {
            return Ok(Arc::clone(storage));
        }

        let mut current = self.current.write().await;
        if let Some(storage) = current.as_ref() {
            return Ok(Arc::clone(storage));
        }

        let settings = self.source.storage_settings().await?;
        let storage = Arc::new(Storage::resolve(&settings)?);
        *current = Some(Arc::clone(&storage));
        Ok(storage)
    }

    /// Drop the cached backend so the next [`get`](Self::get) re-reads
    /// settings.
    pub async fn reset(&self) {
        if self.current.write().await.take().is_some() {
            info!("Storage provider reset");
        }
    }
}
