//! The unified storage backend.

use std::path::Path;

use bytes::Bytes;
use filedrop_shared::ProviderKind;
use tracing::{info, warn};

use super::config::StorageSettings;
use super::error::StorageError;
use super::local::LocalStorage;
use super::s3::S3Storage;
use super::types::{ByteRange, ByteStream, CompletedPart};
use super::writer::FileWriter;

/// A storage backend. Every variant supports the same operations, except
/// `rename_folder` which only local storage implements.
pub enum Storage {
    /// Local filesystem.
    Local(LocalStorage),
    /// S3-compatible object store.
    S3(S3Storage),
}

impl Storage {
    /// Construct the backend `settings` select.
    ///
    /// If S3 is selected but cannot be constructed, the failure is logged and
    /// local storage is used instead.
    ///
    /// # Errors
    ///
    /// Returns an error only if the local backend itself cannot be built.
    pub fn resolve(settings: &StorageSettings) -> Result<Self, StorageError> {
        let storage = match settings.provider {
            ProviderKind::S3 => match S3Storage::new(settings) {
                Ok(s3) => Self::S3(s3),
                Err(e) => {
                    warn!(error = %e, "S3 storage unavailable, falling back to local storage");
                    Self::Local(LocalStorage::new(&settings.local)?)
                }
            },
            ProviderKind::Local => Self::Local(LocalStorage::new(&settings.local)?),
        };

        info!(provider = %storage.kind(), "Storage provider ready");
        Ok(storage)
    }

    /// Which backend this is.
    #[must_use]
    pub const fn kind(&self) -> ProviderKind {
        match self {
            Self::Local(_) => ProviderKind::Local,
            Self::S3(_) => ProviderKind::S3,
        }
    }

    /// Write a complete payload to `path`.
    ///
    /// # Errors
    ///
    /// Fails on an invalid path (local) or a transport error (S3).
    pub async fn upload_file(
        &self,
        data: Bytes,
        path: &str,
        mime_type: &str,
    ) -> Result<(), StorageError> {
        match self {
            Self::Local(local) => local.upload_file(data, path, mime_type).await,
            Self::S3(s3) => s3.upload_file(data, path, mime_type).await,
        }
    }

    /// Delete `path`. Succeeds if it does not exist.
    ///
    /// # Errors
    ///
    /// Propagates every failure other than "not found".
    pub async fn delete_file(&self, path: &str) -> Result<(), StorageError> {
        match self {
            Self::Local(local) => local.delete_file(path).await,
            Self::S3(s3) => s3.delete_file(path).await,
        }
    }

    /// Stream the bytes of `path`, restricted to `range` if given.
    ///
    /// # Errors
    ///
    /// Fails if the path is invalid or the object does not exist.
    pub async fn get_file_stream(
        &self,
        path: &str,
        range: Option<ByteRange>,
    ) -> Result<ByteStream, StorageError> {
        match self {
            Self::Local(local) => local.get_file_stream(path, range).await,
            Self::S3(s3) => s3.get_file_stream(path, range).await,
        }
    }

    /// URL a client can fetch `path` from.
    ///
    /// # Errors
    ///
    /// Fails only if an S3 URL cannot be presigned.
    pub async fn get_file_url(&self, path: &str) -> Result<String, StorageError> {
        match self {
            Self::Local(local) => Ok(local.get_file_url(path)),
            Self::S3(s3) => s3.get_file_url(path).await,
        }
    }

    /// Size of `path` in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the object is missing.
    pub async fn get_file_size(&self, path: &str) -> Result<u64, StorageError> {
        match self {
            Self::Local(local) => local.get_file_size(path).await,
            Self::S3(s3) => s3.get_file_size(path).await,
        }
    }

    /// Merge the `chunk-<n>` files of `chunks_dir` into `target_path`.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be read or a write fails. S3 aborts its
    /// multipart upload first; local storage keeps its progress for a retry.
    pub async fn upload_chunked_file(
        &self,
        chunks_dir: &Path,
        target_path: &str,
        mime_type: &str,
    ) -> Result<(), StorageError> {
        match self {
            Self::Local(local) => {
                local
                    .upload_chunked_file(chunks_dir, target_path, mime_type)
                    .await
            }
            Self::S3(s3) => {
                s3.upload_chunked_file(chunks_dir, target_path, mime_type)
                    .await
            }
        }
    }

    /// Open a writer that produces `path` when closed.
    ///
    /// # Errors
    ///
    /// Fails if the path is invalid or the upload cannot be started.
    pub async fn create_write_stream(
        &self,
        path: &str,
        mime_type: &str,
    ) -> Result<FileWriter, StorageError> {
        match self {
            Self::Local(local) => Ok(local.create_write_stream(path, mime_type).await?.into()),
            Self::S3(s3) => Ok(s3.create_write_stream(path, mime_type).await?.into()),
        }
    }

    /// Move a folder. Local storage only.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Unsupported`] on S3.
    pub async fn rename_folder(&self, old_path: &str, new_path: &str) -> Result<(), StorageError> {
        match self {
            Self::Local(local) => local.rename_folder(old_path, new_path).await,
            Self::S3(_) => Err(StorageError::Unsupported {
                provider: ProviderKind::S3.name(),
                operation: "rename_folder",
            }),
        }
    }

    /// Start a multipart upload to `path` and return its ID.
    ///
    /// # Errors
    ///
    /// Fails if the path is invalid or the backend refuses the upload.
    pub async fn initialize_multipart_upload(
        &self,
        path: &str,
        mime_type: &str,
    ) -> Result<String, StorageError> {
        match self {
            Self::Local(local) => local.initialize_multipart_upload(path, mime_type).await,
            Self::S3(s3) => s3.initialize_multipart_upload(path, mime_type).await,
        }
    }

    /// Upload one part and return its ETag.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UploadNotFound`] for an unknown upload ID.
    pub async fn upload_part(
        &self,
        path: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<String, StorageError> {
        match self {
            Self::Local(local) => local.upload_part(upload_id, part_number, data).await,
            Self::S3(s3) => s3.upload_part(path, upload_id, part_number, data).await,
        }
    }

    /// Finish a multipart upload.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UploadNotFound`] for an unknown upload ID.
    pub async fn complete_multipart_upload(
        &self,
        path: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), StorageError> {
        match self {
            Self::Local(local) => local.complete_multipart_upload(upload_id, parts).await,
            Self::S3(s3) => s3.complete_multipart_upload(path, upload_id, parts).await,
        }
    }

    /// Cancel a multipart upload.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UploadNotFound`] for an unknown upload ID.
    pub async fn abort_multipart_upload(
        &self,
        path: &str,
        upload_id: &str,
    ) -> Result<(), StorageError> {
        match self {
            Self::Local(local) => local.abort_multipart_upload(upload_id).await,
            Self::S3(s3) => s3.abort_multipart_upload(path, upload_id).await,
        }
    }

    /// URL a client can PUT one part to.
    ///
    /// # Errors
    ///
    /// Fails if an S3 URL cannot be presigned.
    pub async fn get_presigned_part_upload_url(
        &self,
        path: &str,
        upload_id: &str,
        part_number: u32,
    ) -> Result<String, StorageError> {
        match self {
            Self::Local(local) => Ok(local.get_presigned_part_upload_url(upload_id, part_number)),
            Self::S3(s3) => {
                s3.get_presigned_part_upload_url(path, upload_id, part_number)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::config::LocalSettings;
    use filedrop_shared::S3Config;

    #[test]
    fn test_resolve_local() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage =
            Storage::resolve(&StorageSettings::local(LocalSettings::new(dir.path()))).expect("local");
        assert_eq!(storage.kind(), ProviderKind::Local);
    }

    #[test]
    fn test_incomplete_s3_falls_back_to_local() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = S3Config {
            bucket: "filedrop".to_string(),
            ..S3Config::default()
        };
        let settings = StorageSettings::s3(config, LocalSettings::new(dir.path()));

        let storage = Storage::resolve(&settings).expect("fallback");
        assert_eq!(storage.kind(), ProviderKind::Local);
    }

    #[tokio::test]
    async fn test_fallback_storage_is_usable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = StorageSettings::s3(S3Config::default(), LocalSettings::new(dir.path()));
        let storage = Storage::resolve(&settings).expect("fallback");

        storage
            .upload_file(Bytes::from_static(b"still works"), "uploads/a.txt", "text/plain")
            .await
            .expect("upload");
        assert_eq!(storage.get_file_size("uploads/a.txt").await.expect("size"), 11);
    }

    #[test]
    fn test_complete_s3_config_resolves_s3() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = S3Config {
            bucket: "filedrop".to_string(),
            region: "us-east-1".to_string(),
            access_key_id: "key".to_string(),
            secret_access_key: "secret".to_string(),
            endpoint: Some("http://localhost:9000".to_string()),
            force_path_style: true,
        };
        let settings = StorageSettings::s3(config, LocalSettings::new(dir.path()));

        let storage = Storage::resolve(&settings).expect("s3");
        assert_eq!(storage.kind(), ProviderKind::S3);
    }

    #[tokio::test]
    async fn test_write_stream_through_dispatch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage =
            Storage::resolve(&StorageSettings::local(LocalSettings::new(dir.path()))).expect("local");

        let mut writer = storage
            .create_write_stream("out/stream.txt", "text/plain")
            .await
            .expect("writer");
        writer.write(Bytes::from_static(b"abc")).await.expect("write");
        assert_eq!(writer.close().await.expect("close"), 3);
        assert_eq!(storage.get_file_size("out/stream.txt").await.expect("size"), 3);
    }

    #[tokio::test]
    async fn test_abort_write_stream_leaves_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage =
            Storage::resolve(&StorageSettings::local(LocalSettings::new(dir.path()))).expect("local");

        let mut writer = storage
            .create_write_stream("out/aborted.txt", "text/plain")
            .await
            .expect("writer");
        writer.write(Bytes::from_static(b"abc")).await.expect("write");
        writer.abort().await.expect("abort");
        assert!(storage.get_file_size("out/aborted.txt").await.is_err());
    }
}
