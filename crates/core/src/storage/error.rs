//! Storage error types.

use filedrop_shared::AppError;
use thiserror::Error;

/// Storage operation errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Path escapes the storage root or is otherwise malformed.
    #[error("Invalid storage path: {path}")]
    InvalidPath {
        /// The rejected path.
        path: String,
    },

    /// Multipart upload ID was never issued or is already finished.
    #[error("Upload not found: {upload_id}")]
    UploadNotFound {
        /// The unknown upload ID.
        upload_id: String,
    },

    /// Object does not exist.
    #[error("ENOENT: file not found: {key}")]
    NotFound {
        /// Storage key that was not found.
        key: String,
    },

    /// Part number is out of range or was already written.
    #[error("invalid part {part_number} for upload {upload_id}: {reason}")]
    InvalidPart {
        /// Upload the part belongs to.
        upload_id: String,
        /// Offending part number.
        part_number: u32,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// Byte range is inverted or starts past the end of the file.
    #[error("invalid byte range {range} for {size}-byte file")]
    InvalidRange {
        /// The rejected range as a `Range` header value.
        range: String,
        /// Size of the file in bytes.
        size: u64,
    },

    /// The active backend cannot perform this operation.
    #[error("operation not supported by {provider} storage: {operation}")]
    Unsupported {
        /// Backend name.
        provider: &'static str,
        /// Operation that was attempted.
        operation: &'static str,
    },

    /// Storage provider configuration error.
    #[error("storage configuration error: {0}")]
    Configuration(String),

    /// Filesystem error.
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    /// OpenDAL operation error.
    #[error("storage operation failed: {0}")]
    Operation(String),

    /// Object store request failed.
    #[error("object store request failed: {0}")]
    Backend(String),
}

impl StorageError {
    /// Create an invalid path error.
    #[must_use]
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath { path: path.into() }
    }

    /// Create an upload not found error.
    #[must_use]
    pub fn upload_not_found(upload_id: impl Into<String>) -> Self {
        Self::UploadNotFound {
            upload_id: upload_id.into(),
        }
    }

    /// Create a not found error.
    #[must_use]
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Create a configuration error.
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create an operation error.
    #[must_use]
    pub fn operation(msg: impl Into<String>) -> Self {
        Self::Operation(msg.into())
    }

    /// Create an object store error.
    #[must_use]
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Whether the error means "the thing does not exist".
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } | Self::UploadNotFound { .. } => true,
            Self::Io(err) => err.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl From<opendal::Error> for StorageError {
    fn from(err: opendal::Error) -> Self {
        match err.kind() {
            opendal::ErrorKind::NotFound => Self::NotFound {
                key: err.to_string(),
            },
            _ => Self::Operation(err.to_string()),
        }
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        let msg = err.to_string();
        match err {
            StorageError::InvalidPath { .. }
            | StorageError::InvalidRange { .. }
            | StorageError::Unsupported { .. } => Self::Validation(msg),
            StorageError::InvalidPart { .. } => Self::Conflict(msg),
            StorageError::Backend(_) => Self::ExternalService(msg),
            ref e if e.is_not_found() => Self::NotFound(msg),
            _ => Self::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_keep_contract_prefixes() {
        assert_eq!(
            StorageError::invalid_path("../etc/passwd").to_string(),
            "Invalid storage path: ../etc/passwd"
        );
        assert_eq!(
            StorageError::upload_not_found("local-1-abc").to_string(),
            "Upload not found: local-1-abc"
        );
        assert!(
            StorageError::not_found("a.txt")
                .to_string()
                .starts_with("ENOENT")
        );
    }

    #[test]
    fn test_is_not_found() {
        assert!(StorageError::not_found("a").is_not_found());
        assert!(StorageError::upload_not_found("x").is_not_found());
        assert!(
            StorageError::Io(std::io::Error::from(std::io::ErrorKind::NotFound)).is_not_found()
        );
        assert!(!StorageError::invalid_path("/a").is_not_found());
        assert!(!StorageError::backend("timeout").is_not_found());
    }

    #[test]
    fn test_into_app_error() {
        assert_eq!(
            AppError::from(StorageError::invalid_path("/a")).status_code(),
            400
        );
        assert_eq!(
            AppError::from(StorageError::upload_not_found("x")).status_code(),
            404
        );
        assert_eq!(AppError::from(StorageError::not_found("a")).status_code(), 404);
        assert_eq!(
            AppError::from(StorageError::InvalidPart {
                upload_id: "x".to_string(),
                part_number: 1,
                reason: "already written",
            })
            .status_code(),
            409
        );
        assert_eq!(
            AppError::from(StorageError::Unsupported {
                provider: "s3",
                operation: "rename_folder",
            })
            .status_code(),
            400
        );
        assert_eq!(
            AppError::from(StorageError::InvalidRange {
                range: "bytes=7-2".to_string(),
                size: 10,
            })
            .status_code(),
            400
        );
        assert_eq!(
            AppError::from(StorageError::operation("boom")).status_code(),
            500
        );
    }

    #[test]
    fn test_from_opendal_not_found() {
        let err = opendal::Error::new(opendal::ErrorKind::NotFound, "missing");
        assert!(StorageError::from(err).is_not_found());

        let err = opendal::Error::new(opendal::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(StorageError::from(err), StorageError::Operation(_)));
    }
}
