//! Local filesystem backend.
//!
//! Object reads and writes go through an OpenDAL `Fs` operator rooted at the
//! configured directory. In-flight chunk merges and simulated multipart
//! uploads are kept in per-instance state tables; they do not survive a
//! restart and are not shared between processes.

use std::collections::{BTreeMap, BTreeSet};
use std::io::ErrorKind as IoErrorKind;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use futures::{StreamExt, TryStreamExt};
use opendal::{ErrorKind, Operator, Writer, services};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::chunks::list_chunks;
use super::config::LocalSettings;
use super::error::StorageError;
use super::path;
use super::types::{ByteRange, ByteStream, CompletedPart};
use super::writer::LocalFileWriter;

/// State of a chunk merge into one target file.
#[derive(Default)]
struct ChunkMerge {
    writer: Option<Writer>,
    processed: BTreeSet<u64>,
    finished: bool,
}

/// State of a simulated multipart upload.
struct LocalUpload {
    path: String,
    writer: Option<Writer>,
    pending: BTreeMap<u32, Bytes>,
    next_part: u32,
}

/// Filesystem-backed storage.
pub struct LocalStorage {
    operator: Operator,
    root: PathBuf,
    base_url: String,
    merges: DashMap<String, Arc<Mutex<ChunkMerge>>>,
    uploads: DashMap<String, Arc<Mutex<LocalUpload>>>,
}

impl LocalStorage {
    /// Create a local backend rooted at `settings.root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the root is not valid UTF-8 or the operator
    /// cannot be built.
    pub fn new(settings: &LocalSettings) -> Result<Self, StorageError> {
        let root = settings
            .root
            .to_str()
            .ok_or_else(|| StorageError::configuration("invalid path"))?;
        let operator = Operator::new(services::Fs::default().root(root))
            .map_err(|e| StorageError::configuration(e.to_string()))?
            .finish();

        Ok(Self {
            operator,
            root: settings.root.clone(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            merges: DashMap::new(),
            uploads: DashMap::new(),
        })
    }

    /// Directory every storage path is resolved against.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    /// Write a complete payload, creating parent directories.
    pub async fn upload_file(
        &self,
        data: Bytes,
        path: &str,
        mime_type: &str,
    ) -> Result<(), StorageError> {
        path::validate(path)?;
        let size = data.len();
        self.operator.write(path, data).await?;
        debug!(path, size, mime_type, "Stored file");
        Ok(())
    }

    /// Delete a file. Missing files are not an error.
    pub async fn delete_file(&self, path: &str) -> Result<(), StorageError> {
        path::validate(path)?;
        match tokio::fs::remove_file(self.full_path(path)).await {
            Ok(()) => {
                debug!(path, "Deleted file");
                Ok(())
            }
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Stream a file, optionally restricted to `range`.
    pub async fn get_file_stream(
        &self,
        path: &str,
        range: Option<ByteRange>,
    ) -> Result<ByteStream, StorageError> {
        path::validate(path)?;
        let size = self
            .operator
            .stat(path)
            .await
            .map_err(|e| not_found_as(path, e))?
            .content_length();

        let span = match range {
            Some(range) => {
                let span = range.resolve(size).ok_or_else(|| StorageError::InvalidRange {
                    range: range.header_value(),
                    size,
                })?;
                (Bound::Included(span.start), Bound::Excluded(span.end))
            }
            None => (Bound::Unbounded, Bound::Unbounded),
        };
        let stream = self
            .operator
            .reader(path)
            .await
            .map_err(|e| not_found_as(path, e))?
            .into_bytes_stream(span)
            .await?;

        Ok(stream.map_err(StorageError::from).boxed())
    }

    /// URL for a stored file.
    ///
    /// Videos go through the range-capable `/api/files` route; everything
    /// else is served from `<path>/raw`.
    #[must_use]
    pub fn get_file_url(&self, path: &str) -> String {
        let public = path::object_key(path);
        if path::is_video(public) {
            format!("{}/api/files/{public}", self.base_url)
        } else {
            format!("{}/{public}/raw", self.base_url)
        }
    }

    /// Size of a stored file in bytes.
    pub async fn get_file_size(&self, path: &str) -> Result<u64, StorageError> {
        path::validate(path)?;
        let meta = self
            .operator
            .stat(path)
            .await
            .map_err(|e| not_found_as(path, e))?;
        Ok(meta.content_length())
    }

    /// Append the `chunk-<n>` files of `chunks_dir` to `target_path` in
    /// numeric order.
    ///
    /// Chunks already written for this target are skipped, so a merge that
    /// failed part-way resumes where it stopped. The target is finalized once
    /// every chunk currently in the directory has been written.
    pub async fn upload_chunked_file(
        &self,
        chunks_dir: &Path,
        target_path: &str,
        mime_type: &str,
    ) -> Result<(), StorageError> {
        path::validate(target_path)?;
        let chunks = list_chunks(chunks_dir).await?;

        let slot = self
            .merges
            .entry(target_path.to_string())
            .or_default()
            .value()
            .clone();
        let mut guard = slot.lock().await;
        let merge = &mut *guard;
        if merge.finished {
            return Ok(());
        }

        if merge.writer.is_none() {
            merge.writer = Some(self.operator.writer(target_path).await?);
        }
        let Some(writer) = merge.writer.as_mut() else {
            return Err(StorageError::operation("chunk writer missing"));
        };

        for chunk in &chunks {
            if merge.processed.contains(&chunk.index) {
                continue;
            }
            let data = tokio::fs::read(&chunk.path).await?;
            writer.write(data).await?;
            merge.processed.insert(chunk.index);
            debug!(path = target_path, chunk = chunk.index, "Merged chunk");
        }

        if merge.processed.len() == chunks.len() {
            if let Some(mut writer) = merge.writer.take() {
                writer.close().await?;
            }
            merge.finished = true;
            self.merges
                .remove_if(target_path, |_, current| Arc::ptr_eq(current, &slot));
            info!(
                path = target_path,
                chunks = chunks.len(),
                mime_type,
                "Chunked upload assembled"
            );
        }

        Ok(())
    }

    /// Open a writer that produces `path` when closed.
    pub async fn create_write_stream(
        &self,
        path: &str,
        mime_type: &str,
    ) -> Result<LocalFileWriter, StorageError> {
        path::validate(path)?;
        let writer = self.operator.writer(path).await?;
        debug!(path, mime_type, "Opened write stream");
        Ok(LocalFileWriter::new(path, self.full_path(path), writer))
    }

    /// Move a folder, creating the destination's parents.
    pub async fn rename_folder(&self, old_path: &str, new_path: &str) -> Result<(), StorageError> {
        path::validate(old_path)?;
        path::validate(new_path)?;

        let from = self.full_path(old_path);
        let to = self.full_path(new_path);
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&from, &to).await?;
        info!(from = old_path, to = new_path, "Renamed folder");
        Ok(())
    }

    /// Start a simulated multipart upload to `path`.
    pub async fn initialize_multipart_upload(
        &self,
        path: &str,
        mime_type: &str,
    ) -> Result<String, StorageError> {
        path::validate(path)?;
        let writer = self.operator.writer(path).await?;

        let random = Uuid::new_v4().simple().to_string();
        let upload_id = format!("local-{}-{}", Utc::now().timestamp_millis(), &random[..9]);

        self.uploads.insert(
            upload_id.clone(),
            Arc::new(Mutex::new(LocalUpload {
                path: path.to_string(),
                writer: Some(writer),
                pending: BTreeMap::new(),
                next_part: 1,
            })),
        );
        debug!(path, upload_id = %upload_id, mime_type, "Multipart upload started");
        Ok(upload_id)
    }

    fn upload(&self, upload_id: &str) -> Result<Arc<Mutex<LocalUpload>>, StorageError> {
        self.uploads
            .get(upload_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| StorageError::upload_not_found(upload_id))
    }

    /// Accept one part. Parts are written as soon as they are contiguous
    /// from part 1; later parts wait in memory.
    ///
    /// Returns a synthetic ETag.
    pub async fn upload_part(
        &self,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<String, StorageError> {
        let slot = self.upload(upload_id)?;
        let mut guard = slot.lock().await;
        let upload = &mut *guard;
        let Some(writer) = upload.writer.as_mut() else {
            return Err(StorageError::upload_not_found(upload_id));
        };

        if part_number == 0 {
            return Err(invalid_part(upload_id, part_number, "part numbers start at 1"));
        }
        if part_number < upload.next_part {
            return Err(invalid_part(upload_id, part_number, "part already written"));
        }

        upload.pending.insert(part_number, data);
        while let Some(data) = upload.pending.remove(&upload.next_part) {
            writer.write(data).await?;
            upload.next_part += 1;
        }

        debug!(upload_id, part_number, "Part received");
        Ok(format!(
            "{upload_id}-{part_number}-{}",
            Utc::now().timestamp_millis()
        ))
    }

    /// Write the remaining parts in order and finalize the file.
    pub async fn complete_multipart_upload(
        &self,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), StorageError> {
        let slot = self.upload(upload_id)?;
        let mut guard = slot.lock().await;
        let upload = &mut *guard;
        let Some(mut writer) = upload.writer.take() else {
            return Err(StorageError::upload_not_found(upload_id));
        };
        self.uploads.remove(upload_id);

        if let Some(missing) = parts.iter().find(|part| {
            part.part_number >= upload.next_part && !upload.pending.contains_key(&part.part_number)
        }) {
            drop(writer);
            self.delete_file(&upload.path).await?;
            return Err(invalid_part(upload_id, missing.part_number, "part was never uploaded"));
        }

        for (_, data) in std::mem::take(&mut upload.pending) {
            writer.write(data).await?;
        }
        writer.close().await?;

        info!(path = %upload.path, upload_id, parts = parts.len(), "Multipart upload completed");
        Ok(())
    }

    /// Drop an in-progress upload and remove its partial file.
    pub async fn abort_multipart_upload(&self, upload_id: &str) -> Result<(), StorageError> {
        let slot = self.upload(upload_id)?;
        let mut guard = slot.lock().await;
        let Some(writer) = guard.writer.take() else {
            return Err(StorageError::upload_not_found(upload_id));
        };
        self.uploads.remove(upload_id);
        guard.pending.clear();

        drop(writer);
        self.delete_file(&guard.path).await?;
        info!(path = %guard.path, upload_id, "Multipart upload aborted");
        Ok(())
    }

    /// Synthetic marker; there is no out-of-process upload for local disk.
    #[must_use]
    pub fn get_presigned_part_upload_url(&self, upload_id: &str, part_number: u32) -> String {
        format!("local://{upload_id}/{part_number}")
    }
}

fn invalid_part(upload_id: &str, part_number: u32, reason: &'static str) -> StorageError {
    StorageError::InvalidPart {
        upload_id: upload_id.to_string(),
        part_number,
        reason,
    }
}

fn not_found_as(path: &str, err: opendal::Error) -> StorageError {
    if err.kind() == ErrorKind::NotFound {
        StorageError::not_found(path)
    } else {
        err.into()
    }
}
