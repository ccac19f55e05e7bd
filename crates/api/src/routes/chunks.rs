//! Chunked upload routes.
//!
//! Clients PUT numbered chunks into a scratch directory, then ask for them
//! to be merged into the final file.

use std::path::PathBuf;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{post, put},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{error_response, storage_path};
use crate::AppState;
use filedrop_core::storage::path::chunk_file_name;
use filedrop_shared::AppError;

/// Creates the chunk upload routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/chunks/{upload_id}/{index}", put(upload_chunk))
        .route("/chunks/{upload_id}/complete", post(complete_chunks))
}

/// Request body for merging uploaded chunks.
#[derive(Debug, Deserialize)]
pub struct CompleteChunksRequest {
    /// Destination path.
    pub path: String,
    /// MIME type of the assembled file.
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
}

fn default_mime_type() -> String {
    "application/octet-stream".to_string()
}

/// Response for a received chunk.
#[derive(Debug, Serialize)]
pub struct ChunkResponse {
    /// Chunk index.
    pub index: u64,
    /// Chunk size in bytes.
    pub size: usize,
}

/// Response for an assembled file.
#[derive(Debug, Serialize)]
pub struct CompleteChunksResponse {
    /// Storage path.
    pub path: String,
    /// URL the file can be fetched from.
    pub url: String,
}

/// Scratch directory for one chunked upload.
///
/// Upload IDs are a single path segment of ASCII letters, digits, `-` and `_`.
fn chunk_dir(state: &AppState, upload_id: &str) -> Result<PathBuf, AppError> {
    let valid = !upload_id.is_empty()
        && upload_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(AppError::Validation(format!(
            "invalid upload id: {upload_id}"
        )));
    }
    Ok(state.files.chunk_dir.join(upload_id))
}

/// PUT `/chunks/{upload_id}/{index}`
/// Store one chunk in the scratch directory.
async fn upload_chunk(
    State(state): State<AppState>,
    Path((upload_id, index)): Path<(String, u64)>,
    body: Bytes,
) -> Result<Response, Response> {
    let dir = chunk_dir(&state, &upload_id).map_err(error_response)?;
    let size = body.len();

    let stored = async {
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(chunk_file_name(index)), body).await
    }
    .await;
    stored.map_err(|e| error_response(AppError::Internal(format!("failed to store chunk: {e}"))))?;

    debug!(upload_id = %upload_id, index, size, "Chunk received");
    Ok((StatusCode::CREATED, Json(ChunkResponse { index, size })).into_response())
}

/// POST `/chunks/{upload_id}/complete`
/// Merge the stored chunks into the destination and drop the scratch directory.
async fn complete_chunks(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
    Json(payload): Json<CompleteChunksRequest>,
) -> Result<Response, Response> {
    let dir = chunk_dir(&state, &upload_id).map_err(error_response)?;
    if !dir.is_dir() {
        return Err(error_response(AppError::NotFound(format!(
            "Upload not found: {upload_id}"
        ))));
    }

    let path = storage_path(&payload.path);
    let storage = state.storage.get().await.map_err(error_response)?;
    storage
        .upload_chunked_file(&dir, &path, &payload.mime_type)
        .await
        .map_err(error_response)?;

    if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
        warn!(upload_id = %upload_id, error = %e, "Failed to remove chunk directory");
    }

    let url = storage.get_file_url(&path).await.map_err(error_response)?;
    info!(upload_id = %upload_id, path = %path, "Chunked upload completed");
    Ok(Json(CompleteChunksResponse { path, url }).into_response())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::create_router;
    use crate::testing::{body_json, local_state};

    async fn send(
        app: &axum::Router,
        method: &str,
        uri: &str,
        body: Body,
    ) -> axum::response::Response {
        app.clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header("Content-Type", "application/json")
                    .body(body)
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_chunks_merge_in_numeric_order() {
        let (dir, state) = local_state();
        let chunk_root = state.files.chunk_dir.clone();
        let app = create_router(state);

        // Sent out of order; chunk-10 must land after chunk-9.
        for index in [10u64, 2, 0, 9, 1, 3, 4, 5, 6, 7, 8] {
            let response = send(
                &app,
                "PUT",
                &format!("/api/chunks/up-1/{index}"),
                Body::from(format!("<{index}>")),
            )
            .await;
            assert_eq!(response.status(), StatusCode::CREATED);
        }

        let response = send(
            &app,
            "POST",
            "/api/chunks/up-1/complete",
            Body::from(r#"{"path":"videos/movie.mp4","mime_type":"video/mp4"}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["url"], "http://localhost:3000/api/files/videos/movie.mp4");

        let merged = tokio::fs::read_to_string(dir.path().join("uploads/videos/movie.mp4"))
            .await
            .expect("merged file");
        let expected: String = (0..=10).map(|i| format!("<{i}>")).collect();
        assert_eq!(merged, expected);
        assert!(!chunk_root.join("up-1").exists());
    }

    #[tokio::test]
    async fn test_complete_unknown_upload() {
        let (_dir, state) = local_state();
        let app = create_router(state);

        let response = send(
            &app,
            "POST",
            "/api/chunks/never-started/complete",
            Body::from(r#"{"path":"a.bin"}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_upload_id() {
        let (_dir, state) = local_state();
        let app = create_router(state);

        let response = send(&app, "PUT", "/api/chunks/bad.id/0", Body::from("x")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
