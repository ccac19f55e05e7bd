//! HTTP API layer with Axum routes.
//!
//! This crate provides:
//! - File upload, download, range streaming and deletion routes
//! - Chunked and multipart upload routes
//! - An admin route that reloads storage settings

pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use filedrop_core::storage::{SharedSettings, StorageHandle, StorageSettings};
use filedrop_shared::FilesConfig;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Lazily resolved storage backend.
    pub storage: Arc<StorageHandle<SharedSettings>>,
    /// File routing settings (chunk scratch directory, body limit).
    pub files: Arc<FilesConfig>,
}

impl AppState {
    /// Create state from storage settings and file settings.
    #[must_use]
    pub fn new(settings: StorageSettings, files: FilesConfig) -> Self {
        Self {
            storage: Arc::new(StorageHandle::new(SharedSettings::new(settings))),
            files: Arc::new(files),
        }
    }
}

/// Creates the main application router.
pub fn create_router(state: AppState) -> Router {
    let max_body_size = state.files.max_body_size;

    Router::new()
        .nest("/api", routes::api_routes())
        .fallback(routes::files::serve_raw)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_size))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
