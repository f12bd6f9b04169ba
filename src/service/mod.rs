//! HTTP surface of the generation & query service.
//!
//! Every handler is a thin translation between JSON and the provider, the
//! object store and the image table. All responses carry permissive CORS
//! headers and `OPTIONS` preflights are answered with an empty 200.

pub mod handlers;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use crate::{provider::ImageProvider, storage::{ImageTable, LocalFileStorage}};

#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<dyn ImageProvider>,
    pub storage: Arc<LocalFileStorage>,
    pub table: Arc<dyn ImageTable>,
}

pub fn build_router(state: AppState) -> Router {
    let images_dir = state.storage.resolve_path("images");
    Router::new()
        .route("/generate", post(handlers::generate_image))
        .route("/gallery", get(handlers::gallery_images))
        .route("/search", get(handlers::search_images))
        .route("/healthz", get(|| async { "ok" }))
        .nest_service("/images", ServeDir::new(images_dir))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
