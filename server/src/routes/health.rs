//! Health check endpoint.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::AppState;

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Live listeners currently subscribed to changes
    pub listeners: usize,
    /// Collections with at least one listener
    pub watched_collections: usize,
}

/// Create health routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/", get(root))
}

/// Health check handler.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        listeners: state.notifier.listener_count(),
        watched_collections: state.notifier.collection_count(),
    })
}

/// Root handler.
async fn root() -> &'static str {
    "Liveset Server"
}
