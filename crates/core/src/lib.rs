//! Storage core for filedrop.
//!
//! This crate owns every storage operation the server performs and has no
//! web dependencies. Route handlers obtain a backend through
//! [`storage::StorageHandle`] and call it directly.
//!
//! # Modules
//!
//! - `storage` - Local and S3 backends, chunk merging, multipart uploads

pub mod storage;
