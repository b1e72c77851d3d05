//! Liveset Server - live query subscriptions over JSON records.
//!
//! This server exposes record collections over HTTP. Any list or get request
//! sent with `Accept: text/event-stream` becomes a live stream that follows
//! the query as records change, using the liveset-engine view logic.

mod auth;
mod config;
mod error;
mod handlers;
mod notify;
mod routes;
mod schema;
mod stream;
#[cfg(test)]
mod test_support;

use crate::config::Config;
use crate::notify::Notifier;
use axum::Router;
use liveset_engine::{MemoryStore, RecordStore};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RecordStore>,
    pub notifier: Arc<Notifier>,
    pub config: Arc<Config>,
    /// Cancelled on shutdown; every session holds a child token
    pub shutdown: CancellationToken,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "liveset_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting Liveset Server on {}:{}", config.host, config.port);

    let schema = schema::load_schema(config.schema_path.as_deref())?;
    if let Some(auth) = &config.auth {
        schema.collection(&auth.collection)?;
        tracing::info!(collection = %auth.collection, "Basic auth enabled");
    }

    // Build application state
    let shutdown = CancellationToken::new();
    let state = AppState {
        store: Arc::new(MemoryStore::new(schema)),
        notifier: Notifier::new_shared(config.listener_buffer),
        config: Arc::new(config.clone()),
        shutdown: shutdown.clone(),
    };

    // Build router
    let app = Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Wait for Ctrl-C, then cancel every live session so open streams end and
/// the server can drain.
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }

    tracing::info!("Shutdown requested, closing live sessions");
    shutdown.cancel();
}
