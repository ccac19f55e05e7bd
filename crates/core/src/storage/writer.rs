//! Incremental writers returned by `create_write_stream`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use opendal::Writer;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use super::error::StorageError;
use super::s3::S3MultipartWriter;

/// Writer over a local file.
///
/// Dropping the writer without `close` or `abort` removes the partial file
/// in the background.
pub struct LocalFileWriter {
    path: String,
    full_path: PathBuf,
    writer: Option<Writer>,
    written: u64,
}

impl LocalFileWriter {
    pub(crate) fn new(path: &str, full_path: PathBuf, writer: Writer) -> Self {
        Self {
            path: path.to_string(),
            full_path,
            writer: Some(writer),
            written: 0,
        }
    }

    fn writer(&mut self) -> Result<&mut Writer, StorageError> {
        self.writer
            .as_mut()
            .ok_or_else(|| StorageError::operation("write stream already finished"))
    }

    /// Append bytes.
    pub async fn write(&mut self, data: Bytes) -> Result<(), StorageError> {
        let len = data.len() as u64;
        self.writer()?.write(data).await?;
        self.written += len;
        Ok(())
    }

    /// Finish the file and return the number of bytes written.
    pub async fn close(mut self) -> Result<u64, StorageError> {
        if let Some(mut writer) = self.writer.take() {
            writer.close().await?;
        }
        debug!(path = %self.path, size = self.written, "Write stream closed");
        Ok(self.written)
    }

    /// Discard everything written so far and remove the file.
    pub async fn abort(mut self) -> Result<(), StorageError> {
        drop(self.writer.take());
        remove_partial(&self.full_path).await?;
        debug!(path = %self.path, "Write stream aborted");
        Ok(())
    }
}

impl Drop for LocalFileWriter {
    fn drop(&mut self) {
        let Some(writer) = self.writer.take() else {
            return;
        };
        drop(writer);
        warn!(path = %self.path, "Write stream dropped unfinished, removing partial file");

        let Ok(runtime) = Handle::try_current() else {
            return;
        };
        let full_path = self.full_path.clone();
        let path = std::mem::take(&mut self.path);
        runtime.spawn(async move {
            if let Err(e) = remove_partial(&full_path).await {
                warn!(path = %path, error = %e, "Failed to remove partial file");
            }
        });
    }
}

async fn remove_partial(full_path: &Path) -> Result<(), StorageError> {
    match tokio::fs::remove_file(full_path).await {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

/// Writable sink for either backend.
///
/// Finish with [`close`](Self::close) or [`abort`](Self::abort). A writer
/// dropped before either (for example when a request is cancelled) logs a
/// warning and cleans up in the background: the partial local file is
/// removed or the S3 multipart upload is aborted.
pub enum FileWriter {
    /// Local file writer.
    Local(LocalFileWriter),
    /// Buffered S3 multipart writer.
    S3(S3MultipartWriter),
}

impl FileWriter {
    /// Append bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying write or part upload fails. An S3
    /// writer aborts its upload before returning the error.
    pub async fn write(&mut self, data: Bytes) -> Result<(), StorageError> {
        match self {
            Self::Local(writer) => writer.write(data).await,
            Self::S3(writer) => writer.write(data).await,
        }
    }

    /// Finalize the object and return the total bytes written.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing or completing the object fails.
    pub async fn close(self) -> Result<u64, StorageError> {
        match self {
            Self::Local(writer) => writer.close().await,
            Self::S3(writer) => writer.close().await,
        }
    }

    /// Cancel the write. Nothing is left at the target.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend refuses the abort.
    pub async fn abort(self) -> Result<(), StorageError> {
        match self {
            Self::Local(writer) => writer.abort().await,
            Self::S3(writer) => writer.abort().await,
        }
    }
}

impl From<LocalFileWriter> for FileWriter {
    fn from(writer: LocalFileWriter) -> Self {
        Self::Local(writer)
    }
}

impl From<S3MultipartWriter> for FileWriter {
    fn from(writer: S3MultipartWriter) -> Self {
        Self::S3(writer)
    }
}
