//! Shared errors and configuration for Filedrop.
//!
//! This crate provides common types used across all other crates:
//! - Application-wide error types
//! - Configuration management

pub mod config;
pub mod error;

pub use config::{AppConfig, FilesConfig, ProviderKind, S3Config, StorageConfig};
pub use error::{AppError, AppResult};
