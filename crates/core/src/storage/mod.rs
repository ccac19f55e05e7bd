//! File storage with interchangeable backends.
//!
//! Two backends implement the same operation set:
//! - [`LocalStorage`]: files on the local filesystem (via Apache OpenDAL)
//! - [`S3Storage`]: any S3-compatible object store (AWS S3, MinIO, R2, Spaces)
//!
//! [`Storage`] is the sum of both. [`StorageHandle`] resolves the configured
//! backend on first use, falls back to local storage when S3 is misconfigured,
//! and can be reset after the settings change.
//!
//! # Uploads
//!
//! ```text
//! small file    upload_file(bytes, path)
//! streamed      create_write_stream(path) -> FileWriter::write ... close
//! chunked       chunk-0, chunk-1, ... in a directory -> upload_chunked_file
//! multipart     initialize -> upload_part * N -> complete | abort
//! ```

mod chunks;
mod config;
mod error;
mod handle;
mod local;
pub mod path;
mod provider;
mod s3;
mod types;
mod writer;

pub use config::{LocalSettings, StorageSettings};
pub use error::StorageError;
pub use handle::{SettingsSource, SharedSettings, StaticSettings, StorageHandle};
pub use local::LocalStorage;
pub use provider::Storage;
pub use s3::{MAX_PARTS, MIN_PART_SIZE, S3MultipartWriter, S3Storage};
pub use types::{ByteRange, ByteStream, CompletedPart};
pub use writer::{FileWriter, LocalFileWriter};
