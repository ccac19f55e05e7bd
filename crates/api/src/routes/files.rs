//! File routes: streamed upload, ranged download, size, delete, raw serving.

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::get,
};
use futures::StreamExt;
use serde::Serialize;
use tracing::{info, warn};

use super::{error_response, storage_path};
use crate::AppState;
use filedrop_core::storage::ByteRange;
use filedrop_shared::AppError;

/// Suffix of the non-video URLs produced for local storage.
const RAW_SUFFIX: &str = "/raw";

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Creates the file routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/files/{*path}",
            get(download_file).put(upload_file).delete(delete_file),
        )
        .route("/size/{*path}", get(file_size))
}

/// Response for a stored file.
#[derive(Debug, Serialize)]
pub struct StoredFileResponse {
    /// Storage path.
    pub path: String,
    /// Bytes written.
    pub size: u64,
    /// URL the file can be fetched from.
    pub url: String,
}

/// Response for a size query.
#[derive(Debug, Serialize)]
pub struct FileSizeResponse {
    /// Size in bytes.
    pub size: u64,
}

/// Content type guessed from the file extension.
fn content_type(path: &str) -> &'static str {
    let ext = path.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("mp4" | "m4v") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        Some("mkv") => "video/x-matroska",
        Some("avi") => "video/x-msvideo",
        Some("ogv") => "video/ogg",
        Some("mp3") => "audio/mpeg",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain; charset=utf-8",
        Some("json") => "application/json",
        _ => DEFAULT_MIME_TYPE,
    }
}

fn request_mime_type(headers: &HeaderMap) -> &str {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or(DEFAULT_MIME_TYPE)
}

/// PUT `/files/{*path}`
/// Stream the request body into storage.
async fn upload_file(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, Response> {
    let path = storage_path(&key);
    let storage = state.storage.get().await.map_err(error_response)?;
    let mut writer = storage
        .create_write_stream(&path, request_mime_type(&headers))
        .await
        .map_err(error_response)?;

    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        let written = match chunk {
            Ok(bytes) => writer.write(bytes).await.map_err(error_response),
            Err(e) => Err(error_response(AppError::Validation(format!(
                "failed to read request body: {e}"
            )))),
        };
        if let Err(response) = written {
            if let Err(e) = writer.abort().await {
                warn!(path = %path, error = %e, "Failed to abort write stream");
            }
            return Err(response);
        }
    }

    let size = writer.close().await.map_err(error_response)?;
    let url = storage.get_file_url(&path).await.map_err(error_response)?;
    info!(path = %path, size, "File uploaded");

    Ok((StatusCode::CREATED, Json(StoredFileResponse { path, size, url })).into_response())
}

/// GET `/files/{*path}`
/// Stream a file, honoring a single `Range` header.
async fn download_file(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Result<Response, Response> {
    stream_file(&state, &storage_path(&key), &headers).await
}

async fn stream_file(
    state: &AppState,
    path: &str,
    headers: &HeaderMap,
) -> Result<Response, Response> {
    let storage = state.storage.get().await.map_err(error_response)?;
    let size = storage.get_file_size(path).await.map_err(error_response)?;

    let requested = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok());
    let range = match requested {
        Some(value) => match ByteRange::parse_header(value, size) {
            Some(range) => Some(range),
            None => {
                return Ok((
                    StatusCode::RANGE_NOT_SATISFIABLE,
                    [(header::CONTENT_RANGE, format!("bytes */{size}"))],
                )
                    .into_response());
            }
        },
        None => None,
    };

    let stream = storage
        .get_file_stream(path, range)
        .await
        .map_err(error_response)?;

    let mut response = Response::new(Body::from_stream(stream));
    let response_headers = response.headers_mut();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type(path)),
    );
    response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));

    match range {
        Some(ByteRange {
            start: Some(start),
            end: Some(end),
        }) => {
            *response.status_mut() = StatusCode::PARTIAL_CONTENT;
            let response_headers = response.headers_mut();
            response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(end - start + 1));
            if let Ok(value) = HeaderValue::from_str(&format!("bytes {start}-{end}/{size}")) {
                response_headers.insert(header::CONTENT_RANGE, value);
            }
        }
        _ => {
            response
                .headers_mut()
                .insert(header::CONTENT_LENGTH, HeaderValue::from(size));
        }
    }

    Ok(response)
}

/// GET `/size/{*path}`
async fn file_size(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, Response> {
    let storage = state.storage.get().await.map_err(error_response)?;
    let size = storage
        .get_file_size(&storage_path(&key))
        .await
        .map_err(error_response)?;
    Ok(Json(FileSizeResponse { size }).into_response())
}

/// DELETE `/files/{*path}`
/// Deleting a missing file succeeds.
async fn delete_file(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, Response> {
    let path = storage_path(&key);
    let storage = state.storage.get().await.map_err(error_response)?;
    storage.delete_file(&path).await.map_err(error_response)?;
    info!(path = %path, "File deleted");
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// Fallback serving `/{key}/raw`, the URL shape local storage hands out
/// for non-video files.
pub async fn serve_raw(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, Response> {
    let Some(key) = uri
        .path()
        .strip_suffix(RAW_SUFFIX)
        .map(|key| key.trim_start_matches('/'))
        .filter(|key| !key.is_empty())
    else {
        return Err(error_response(AppError::NotFound(format!(
            "no route for {}",
            uri.path()
        ))));
    };

    stream_file(&state, &storage_path(key), &headers).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::create_router;
    use crate::testing::{body_bytes, body_json, local_state};

    async fn put(app: &Router, uri: &str, body: &'static [u8]) -> Response {
        app.clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri(uri)
                    .header("Content-Type", "text/plain")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn get_with_range(app: &Router, uri: &str, range: Option<&str>) -> Response {
        let mut request = Request::builder().method("GET").uri(uri);
        if let Some(range) = range {
            request = request.header("Range", range);
        }
        app.clone()
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_upload_then_download() {
        let (dir, state) = local_state();
        let app = create_router(state);

        let response = put(&app, "/api/files/docs/readme.txt", b"hello filedrop").await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["path"], "uploads/docs/readme.txt");
        assert_eq!(body["size"], 14);
        assert_eq!(body["url"], "http://localhost:3000/docs/readme.txt/raw");
        assert!(dir.path().join("uploads/docs/readme.txt").exists());

        let response = get_with_range(&app, "/api/files/docs/readme.txt", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-length"], "14");
        assert_eq!(body_bytes(response).await, b"hello filedrop");
    }

    #[tokio::test]
    async fn test_range_request() {
        let (_dir, state) = local_state();
        let app = create_router(state);
        put(&app, "/api/files/clip.mp4", b"0123456789").await;

        let response = get_with_range(&app, "/api/files/clip.mp4", Some("bytes=2-5")).await;
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()["content-range"], "bytes 2-5/10");
        assert_eq!(response.headers()["content-type"], "video/mp4");
        assert_eq!(body_bytes(response).await, b"2345");

        let response = get_with_range(&app, "/api/files/clip.mp4", Some("bytes=50-")).await;
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()["content-range"], "bytes */10");
    }

    #[tokio::test]
    async fn test_missing_file_is_404() {
        let (_dir, state) = local_state();
        let app = create_router(state);

        let response = get_with_range(&app, "/api/files/nope.txt", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["error"], "NOT_FOUND");
        assert!(body["message"].as_str().unwrap().contains("ENOENT"));

        let response = get_with_range(&app, "/api/size/nope.txt", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let (_dir, state) = local_state();
        let app = create_router(state);

        let response = put(&app, "/api/files/a/../../escape.txt", b"x").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(
            body["message"]
                .as_str()
                .unwrap()
                .starts_with("Invalid storage path")
        );
    }

    #[tokio::test]
    async fn test_size_and_delete() {
        let (dir, state) = local_state();
        let app = create_router(state);
        put(&app, "/api/files/sized.txt", b"12345").await;

        let response = get_with_range(&app, "/api/size/sized.txt", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["size"], 5);

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method("DELETE")
                        .uri("/api/files/sized.txt")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
        }
        assert!(!dir.path().join("uploads/sized.txt").exists());
    }

    #[tokio::test]
    async fn test_raw_url_serves_file() {
        let (_dir, state) = local_state();
        let app = create_router(state);
        put(&app, "/api/files/test/image.txt", b"raw bytes").await;

        let response = get_with_range(&app, "/test/image.txt/raw", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, b"raw bytes");

        let response = get_with_range(&app, "/not-a-route", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_content_type() {
        assert_eq!(content_type("a/video.MP4"), "video/mp4");
        assert_eq!(content_type("image.jpeg"), "image/jpeg");
        assert_eq!(content_type("archive"), DEFAULT_MIME_TYPE);
    }
}
