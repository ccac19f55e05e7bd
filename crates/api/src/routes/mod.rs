//! API route definitions.

use axum::{Json, Router, http::StatusCode, response::IntoResponse, response::Response};
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use crate::AppState;
use filedrop_shared::AppError;

pub mod admin;
pub mod chunks;
pub mod files;
pub mod health;
pub mod multipart;

/// Creates the API router with all routes.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(health::routes())
        .merge(files::routes())
        .merge(chunks::routes())
        .merge(multipart::routes())
        .merge(admin::routes())
}

/// Query string carrying a storage path.
#[derive(Debug, Deserialize)]
pub struct PathQuery {
    /// Storage path the upload targets.
    pub path: String,
}

/// Map a public file key to its storage path.
///
/// Keys already under `uploads/` or `public/` are used as-is; everything
/// else is stored under `uploads/`, matching the URLs `get_file_url` builds.
pub(crate) fn storage_path(key: &str) -> String {
    let key = key.trim_start_matches('/');
    if key.starts_with("uploads/") || key.starts_with("public/") {
        key.to_string()
    } else {
        format!("uploads/{key}")
    }
}

/// Render an error as `{ "error": code, "message": msg }`.
pub(crate) fn error_response(err: impl Into<AppError>) -> Response {
    let err = err.into();
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        error!(error = %err, "Request failed");
    }

    (
        status,
        Json(json!({
            "error": err.error_code(),
            "message": err.message(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("test/image.jpg", "uploads/test/image.jpg")]
    #[case("/test/image.jpg", "uploads/test/image.jpg")]
    #[case("uploads/test/image.jpg", "uploads/test/image.jpg")]
    #[case("public/avatar.png", "public/avatar.png")]
    fn test_storage_path(#[case] key: &str, #[case] expected: &str) {
        assert_eq!(storage_path(key), expected);
    }

    #[test]
    fn test_error_response_status() {
        let response = error_response(AppError::NotFound("gone".to_string()));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = error_response(AppError::Internal("boom".to_string()));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
