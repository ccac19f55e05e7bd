//! Health check endpoints.

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::AppState;

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: &'static str,
    /// Service version.
    pub version: &'static str,
    /// Active storage provider, if it could be resolved.
    pub storage: Option<&'static str>,
}

/// Health check handler.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let storage = state
        .storage
        .get()
        .await
        .ok()
        .map(|storage| storage.kind().name());

    Json(HealthResponse {
        status: if storage.is_some() { "healthy" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        storage,
    })
}

/// Creates health check routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
