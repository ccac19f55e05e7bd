//! S3-compatible object store backend.
//!
//! Uses the AWS SDK directly for native multipart uploads and presigned
//! part URLs. Storage paths are turned into object keys with
//! [`path::object_key`]; they are normalized rather than rejected.

use std::path::Path;
use std::time::Duration;

use aws_sdk_s3::Client;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{BehaviorVersion, Builder, Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream as S3Body;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart};
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, TryStreamExt, stream};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use super::chunks::list_chunks;
use super::config::StorageSettings;
use super::error::StorageError;
use super::path;
use super::types::{ByteRange, ByteStream, CompletedPart};

/// Minimum size of every part but the last one.
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Highest part number the multipart API accepts.
pub const MAX_PARTS: u32 = 10_000;

/// Error codes that mean the object or upload does not exist.
const MISSING_CODES: &[&str] = &["NoSuchKey", "NotFound", "NoSuchUpload"];

/// S3-compatible storage.
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
    endpoint: Option<String>,
    part_upload_concurrency: usize,
    presign_ttl: Duration,
}

impl S3Storage {
    /// Build a client from `settings.s3`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming every empty required field.
    pub fn new(settings: &StorageSettings) -> Result<Self, StorageError> {
        let config = &settings.s3;
        let missing = config.missing_fields();
        if !missing.is_empty() {
            return Err(StorageError::configuration(format!(
                "missing S3 settings: {}",
                missing.join(", ")
            )));
        }

        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "filedrop",
        );

        let mut builder = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .force_path_style(config.force_path_style);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
            endpoint: config.endpoint.clone(),
            part_upload_concurrency: settings.part_upload_concurrency.max(1),
            presign_ttl: Duration::from_secs(settings.presign_ttl_secs),
        })
    }

    /// Bucket objects are stored in.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn presigning(&self) -> Result<PresigningConfig, StorageError> {
        PresigningConfig::expires_in(self.presign_ttl)
            .map_err(|e| StorageError::configuration(format!("invalid presign ttl: {e}")))
    }

    /// Put a complete object.
    pub async fn upload_file(
        &self,
        data: Bytes,
        path: &str,
        mime_type: &str,
    ) -> Result<(), StorageError> {
        let key = path::object_key(path);
        let size = data.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(mime_type)
            .body(S3Body::from(data))
            .send()
            .await
            .map_err(backend_error)?;

        debug!(key, size, "Stored object");
        Ok(())
    }

    /// Delete an object. Missing objects are not an error.
    pub async fn delete_file(&self, path: &str) -> Result<(), StorageError> {
        let key = path::object_key(path);
        match self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => {
                debug!(key, "Deleted object");
                Ok(())
            }
            Err(e) if is_missing(&e) => Ok(()),
            Err(e) => Err(backend_error(e)),
        }
    }

    /// Stream an object, sending `range` as a `Range` header.
    pub async fn get_file_stream(
        &self,
        path: &str,
        range: Option<ByteRange>,
    ) -> Result<ByteStream, StorageError> {
        let key = path::object_key(path);
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .set_range(range.map(|r| r.header_value()))
            .send()
            .await
            .map_err(|e| object_error(key, e))?;

        let body = stream::try_unfold(output.body, |mut body| async move {
            let next = body
                .try_next()
                .await
                .map_err(|e| StorageError::backend(e.to_string()))?;
            Ok::<_, StorageError>(next.map(|bytes| (bytes, body)))
        });
        Ok(body.boxed())
    }

    /// Public URL when a custom endpoint is configured, presigned GET
    /// otherwise.
    pub async fn get_file_url(&self, path: &str) -> Result<String, StorageError> {
        let key = path::object_key(path);
        if let Some(endpoint) = &self.endpoint {
            return Ok(format!(
                "{}/{}/{key}",
                endpoint.trim_end_matches('/'),
                self.bucket
            ));
        }

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(self.presigning()?)
            .await
            .map_err(backend_error)?;
        Ok(presigned.uri().to_string())
    }

    /// Object size from a HEAD request.
    pub async fn get_file_size(&self, path: &str) -> Result<u64, StorageError> {
        let key = path::object_key(path);
        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| object_error(key, e))?;

        Ok(head
            .content_length()
            .and_then(|len| u64::try_from(len).ok())
            .unwrap_or(0))
    }

    /// Upload each chunk as one part of a multipart upload.
    ///
    /// At most `part_upload_concurrency` parts are in flight. Chunks are
    /// numbered by their position in the sorted listing. Any failure aborts
    /// the multipart upload.
    pub async fn upload_chunked_file(
        &self,
        chunks_dir: &Path,
        target_path: &str,
        mime_type: &str,
    ) -> Result<(), StorageError> {
        let chunks = list_chunks(chunks_dir).await?;
        if chunks.len() > MAX_PARTS as usize {
            return Err(StorageError::operation(format!(
                "{} chunks exceed the {MAX_PARTS} part limit",
                chunks.len()
            )));
        }

        let upload_id = self
            .initialize_multipart_upload(target_path, mime_type)
            .await?;

        let uploaded: Result<Vec<CompletedPart>, StorageError> =
            stream::iter(
                chunks
                    .iter()
                    .map(|chunk| chunk.path.clone())
                    .zip(1u32..)
                    .collect::<Vec<_>>(),
            )
                .map(|(chunk_path, part_number)| {
                    let upload_id = upload_id.as_str();
                    async move {
                        let data = tokio::fs::read(&chunk_path).await?;
                        let etag = self
                            .upload_part(target_path, upload_id, part_number, Bytes::from(data))
                            .await?;
                        Ok::<_, StorageError>(CompletedPart::new(etag, part_number))
                    }
                })
                .buffer_unordered(self.part_upload_concurrency)
                .try_collect()
                .await;

        let result = match uploaded {
            Ok(parts) => {
                self.complete_multipart_upload(target_path, &upload_id, &parts)
                    .await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            warn!(path = target_path, upload_id = %upload_id, error = %e, "Chunked upload failed, aborting");
            self.abort_quietly(target_path, &upload_id).await;
            return Err(e);
        }

        info!(
            path = target_path,
            chunks = chunks.len(),
            "Chunked upload assembled"
        );
        Ok(())
    }

    /// Start a multipart upload and wrap it in a buffering writer.
    pub async fn create_write_stream(
        &self,
        path: &str,
        mime_type: &str,
    ) -> Result<S3MultipartWriter, StorageError> {
        let upload_id = self.initialize_multipart_upload(path, mime_type).await?;
        Ok(S3MultipartWriter::new(self.clone(), path, upload_id))
    }

    /// Start a native multipart upload and return its ID.
    pub async fn initialize_multipart_upload(
        &self,
        path: &str,
        mime_type: &str,
    ) -> Result<String, StorageError> {
        let key = path::object_key(path);
        let output = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(mime_type)
            .send()
            .await
            .map_err(backend_error)?;

        let upload_id = output
            .upload_id()
            .ok_or_else(|| StorageError::backend("CreateMultipartUpload returned no upload id"))?
            .to_string();
        debug!(key, upload_id = %upload_id, "Multipart upload started");
        Ok(upload_id)
    }

    /// Upload one part and return its ETag.
    pub async fn upload_part(
        &self,
        path: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<String, StorageError> {
        let key = path::object_key(path);
        let output = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(s3_part_number(upload_id, part_number)?)
            .body(S3Body::from(data))
            .send()
            .await
            .map_err(|e| upload_error(upload_id, e))?;

        debug!(key, upload_id, part_number, "Part uploaded");
        Ok(output.e_tag().unwrap_or_default().to_string())
    }

    /// Complete the upload with `parts` sorted by part number.
    pub async fn complete_multipart_upload(
        &self,
        path: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), StorageError> {
        let key = path::object_key(path);
        let mut sorted = parts.to_vec();
        sorted.sort_by_key(|part| part.part_number);

        let parts = sorted
            .iter()
            .map(|part| {
                Ok(S3CompletedPart::builder()
                    .e_tag(&part.etag)
                    .part_number(s3_part_number(upload_id, part.part_number)?)
                    .build())
            })
            .collect::<Result<Vec<_>, StorageError>>()?;

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| upload_error(upload_id, e))?;

        info!(key, upload_id, parts = sorted.len(), "Multipart upload completed");
        Ok(())
    }

    /// Abort the upload, discarding uploaded parts.
    pub async fn abort_multipart_upload(
        &self,
        path: &str,
        upload_id: &str,
    ) -> Result<(), StorageError> {
        let key = path::object_key(path);
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| upload_error(upload_id, e))?;

        info!(key, upload_id, "Multipart upload aborted");
        Ok(())
    }

    async fn abort_quietly(&self, path: &str, upload_id: &str) {
        if let Err(e) = self.abort_multipart_upload(path, upload_id).await {
            warn!(path, upload_id, error = %e, "Failed to abort multipart upload");
        }
    }

    /// Presigned PUT URL for one part.
    pub async fn get_presigned_part_upload_url(
        &self,
        path: &str,
        upload_id: &str,
        part_number: u32,
    ) -> Result<String, StorageError> {
        let presigned = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(path::object_key(path))
            .upload_id(upload_id)
            .part_number(s3_part_number(upload_id, part_number)?)
            .presigned(self.presigning()?)
            .await
            .map_err(backend_error)?;
        Ok(presigned.uri().to_string())
    }
}

/// Writer that buffers into [`MIN_PART_SIZE`] parts of a multipart upload.
///
/// Each full part is uploaded before `write` returns, so at most one part
/// is buffered. Any failure aborts the upload, and so does dropping the
/// writer before `close` or `abort`.
pub struct S3MultipartWriter {
    storage: S3Storage,
    path: String,
    upload_id: String,
    buffer: BytesMut,
    parts: Vec<CompletedPart>,
    written: u64,
    failed: bool,
    finished: bool,
}

impl S3MultipartWriter {
    fn new(storage: S3Storage, path: &str, upload_id: String) -> Self {
        Self {
            storage,
            path: path.to_string(),
            upload_id,
            buffer: BytesMut::with_capacity(MIN_PART_SIZE),
            parts: Vec::new(),
            written: 0,
            failed: false,
            finished: false,
        }
    }

    /// Upload ID of the underlying multipart upload.
    #[must_use]
    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    /// Append bytes, uploading every full part.
    pub async fn write(&mut self, data: Bytes) -> Result<(), StorageError> {
        if self.failed {
            return Err(StorageError::operation("write stream was aborted"));
        }
        self.written += data.len() as u64;
        self.buffer.extend_from_slice(&data);

        while self.buffer.len() >= MIN_PART_SIZE {
            let part = self.buffer.split_to(MIN_PART_SIZE).freeze();
            if let Err(e) = self.flush_part(part).await {
                self.fail().await;
                return Err(e);
            }
        }
        Ok(())
    }

    async fn flush_part(&mut self, data: Bytes) -> Result<(), StorageError> {
        let part_number = u32::try_from(self.parts.len())
            .map_err(|_| StorageError::operation("too many parts"))?
            + 1;
        let etag = self
            .storage
            .upload_part(&self.path, &self.upload_id, part_number, data)
            .await?;
        self.parts.push(CompletedPart::new(etag, part_number));
        Ok(())
    }

    async fn fail(&mut self) {
        self.failed = true;
        self.buffer.clear();
        self.storage
            .abort_quietly(&self.path, &self.upload_id)
            .await;
    }

    /// Upload the remaining bytes as the last part and complete the upload.
    pub async fn close(mut self) -> Result<u64, StorageError> {
        if self.failed {
            return Err(StorageError::operation("write stream was aborted"));
        }

        // The API needs at least one part, even an empty one.
        if !self.buffer.is_empty() || self.parts.is_empty() {
            let last = std::mem::take(&mut self.buffer).freeze();
            if let Err(e) = self.flush_part(last).await {
                self.fail().await;
                return Err(e);
            }
        }

        if let Err(e) = self
            .storage
            .complete_multipart_upload(&self.path, &self.upload_id, &self.parts)
            .await
        {
            self.fail().await;
            return Err(e);
        }
        self.finished = true;
        Ok(self.written)
    }

    /// Abort the upload.
    pub async fn abort(mut self) -> Result<(), StorageError> {
        if self.failed {
            return Ok(());
        }
        self.finished = true;
        self.storage
            .abort_multipart_upload(&self.path, &self.upload_id)
            .await
    }
}

impl Drop for S3MultipartWriter {
    fn drop(&mut self) {
        if self.finished || self.failed {
            return;
        }
        warn!(
            path = %self.path,
            upload_id = %self.upload_id,
            "Write stream dropped unfinished, aborting multipart upload"
        );

        let Ok(runtime) = Handle::try_current() else {
            return;
        };
        let storage = self.storage.clone();
        let path = std::mem::take(&mut self.path);
        let upload_id = std::mem::take(&mut self.upload_id);
        runtime.spawn(async move {
            storage.abort_quietly(&path, &upload_id).await;
        });
    }
}

fn s3_part_number(upload_id: &str, part_number: u32) -> Result<i32, StorageError> {
    if !(1..=MAX_PARTS).contains(&part_number) {
        return Err(StorageError::InvalidPart {
            upload_id: upload_id.to_string(),
            part_number,
            reason: "part numbers must be between 1 and 10000",
        });
    }
    i32::try_from(part_number).map_err(|_| StorageError::operation("part number overflow"))
}

fn is_missing<E: ProvideErrorMetadata>(err: &SdkError<E, HttpResponse>) -> bool {
    err.code().is_some_and(|code| MISSING_CODES.contains(&code))
        || err
            .raw_response()
            .is_some_and(|response| response.status().as_u16() == 404)
}

fn backend_error<E>(err: SdkError<E, HttpResponse>) -> StorageError
where
    E: std::error::Error + 'static,
{
    StorageError::backend(DisplayErrorContext(&err).to_string())
}

fn object_error<E>(key: &str, err: SdkError<E, HttpResponse>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    if is_missing(&err) {
        StorageError::not_found(key)
    } else {
        backend_error(err)
    }
}

fn upload_error<E>(upload_id: &str, err: SdkError<E, HttpResponse>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    if is_missing(&err) {
        StorageError::upload_not_found(upload_id)
    } else {
        backend_error(err)
    }
}
