//! Shared fixtures for unit tests.

use std::sync::Arc;
use std::time::Duration;

use liveset_engine::MemoryStore;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::notify::Notifier;
use crate::schema::default_schema;
use crate::AppState;

pub fn test_config() -> Config {
    Config {
        heartbeat_interval: Duration::from_secs(3600),
        listener_buffer: 16,
        ..Config::default()
    }
}

pub fn test_state() -> AppState {
    state_with(test_config())
}

pub fn state_with(config: Config) -> AppState {
    AppState {
        store: Arc::new(MemoryStore::new(default_schema())),
        notifier: Notifier::new_shared(config.listener_buffer),
        config: Arc::new(config),
        shutdown: CancellationToken::new(),
    }
}
