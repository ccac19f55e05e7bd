//! Multipart upload routes.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{PathQuery, error_response, storage_path};
use crate::AppState;
use filedrop_core::storage::CompletedPart;

/// Creates the multipart upload routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/multipart", post(initialize_upload))
        .route("/multipart/{upload_id}", delete(abort_upload))
        .route("/multipart/{upload_id}/{part}", put(upload_part))
        .route("/multipart/{upload_id}/{part}/url", get(part_upload_url))
        .route("/multipart/{upload_id}/complete", post(complete_upload))
}

/// Request body for starting a multipart upload.
#[derive(Debug, Deserialize)]
pub struct InitializeRequest {
    /// Destination path.
    pub path: String,
    /// MIME type of the final object.
    pub mime_type: String,
}

/// Response for a started multipart upload.
#[derive(Debug, Serialize)]
pub struct InitializeResponse {
    /// Upload ID to pass to the part and complete routes.
    pub upload_id: String,
    /// Storage path.
    pub path: String,
}

/// Response for an uploaded part.
#[derive(Debug, Serialize)]
pub struct PartResponse {
    /// Part number.
    pub part_number: u32,
    /// ETag to send back on completion.
    pub etag: String,
}

/// Response carrying a URL.
#[derive(Debug, Serialize)]
pub struct UrlResponse {
    /// The URL.
    pub url: String,
}

/// Request body for completing a multipart upload.
#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    /// Destination path.
    pub path: String,
    /// Uploaded parts, in any order.
    pub parts: Vec<CompletedPart>,
}

/// POST `/multipart`
async fn initialize_upload(
    State(state): State<AppState>,
    Json(payload): Json<InitializeRequest>,
) -> Result<Response, Response> {
    let path = storage_path(&payload.path);
    let storage = state.storage.get().await.map_err(error_response)?;
    let upload_id = storage
        .initialize_multipart_upload(&path, &payload.mime_type)
        .await
        .map_err(error_response)?;

    info!(upload_id = %upload_id, path = %path, "Multipart upload started");
    Ok((
        StatusCode::CREATED,
        Json(InitializeResponse { upload_id, path }),
    )
        .into_response())
}

/// PUT `/multipart/{upload_id}/{part}?path=`
async fn upload_part(
    State(state): State<AppState>,
    Path((upload_id, part_number)): Path<(String, u32)>,
    Query(query): Query<PathQuery>,
    body: Bytes,
) -> Result<Response, Response> {
    let storage = state.storage.get().await.map_err(error_response)?;
    let etag = storage
        .upload_part(&storage_path(&query.path), &upload_id, part_number, body)
        .await
        .map_err(error_response)?;
    Ok(Json(PartResponse { part_number, etag }).into_response())
}

/// GET `/multipart/{upload_id}/{part}/url?path=`
async fn part_upload_url(
    State(state): State<AppState>,
    Path((upload_id, part_number)): Path<(String, u32)>,
    Query(query): Query<PathQuery>,
) -> Result<Response, Response> {
    let storage = state.storage.get().await.map_err(error_response)?;
    let url = storage
        .get_presigned_part_upload_url(&storage_path(&query.path), &upload_id, part_number)
        .await
        .map_err(error_response)?;
    Ok(Json(UrlResponse { url }).into_response())
}

/// POST `/multipart/{upload_id}/complete`
async fn complete_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
    Json(payload): Json<CompleteRequest>,
) -> Result<Response, Response> {
    let path = storage_path(&payload.path);
    let storage = state.storage.get().await.map_err(error_response)?;
    storage
        .complete_multipart_upload(&path, &upload_id, &payload.parts)
        .await
        .map_err(error_response)?;

    let url = storage.get_file_url(&path).await.map_err(error_response)?;
    info!(upload_id = %upload_id, path = %path, "Multipart upload completed");
    Ok(Json(UrlResponse { url }).into_response())
}

/// DELETE `/multipart/{upload_id}?path=`
async fn abort_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
    Query(query): Query<PathQuery>,
) -> Result<Response, Response> {
    let storage = state.storage.get().await.map_err(error_response)?;
    storage
        .abort_multipart_upload(&storage_path(&query.path), &upload_id)
        .await
        .map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
