//! Admin routes.

use axum::{
    Json, Router,
    extract::State,
    response::{IntoResponse, Response},
    routing::post,
};
use serde::Serialize;
use tracing::info;

use super::error_response;
use crate::AppState;
use filedrop_shared::StorageConfig;

/// Creates the admin routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/admin/storage/reload", post(reload_storage))
}

/// Response after reloading storage.
#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    /// Provider that was requested.
    pub requested: &'static str,
    /// Provider now active. Differs from `requested` when S3 fell back to local.
    pub active: &'static str,
}

/// POST `/admin/storage/reload`
/// Replace the storage settings and re-resolve the backend.
async fn reload_storage(
    State(state): State<AppState>,
    Json(payload): Json<StorageConfig>,
) -> Result<Response, Response> {
    let settings = state
        .storage
        .source()
        .current()
        .with_storage_config(&payload);
    state.storage.source().replace(settings);
    state.storage.reset().await;

    let storage = state.storage.get().await.map_err(error_response)?;
    let response = ReloadResponse {
        requested: payload.provider.name(),
        active: storage.kind().name(),
    };
    info!(requested = response.requested, active = response.active, "Storage settings reloaded");
    Ok(Json(response).into_response())
}
