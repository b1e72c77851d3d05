//! Configuration management for the server.

use liveset_engine::StreamMode;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Idle time after which a stream sends a heartbeat
    pub heartbeat_interval: Duration,
    /// Pending change events buffered per listener
    pub listener_buffer: usize,
    /// Stream format imposed on every list stream, ignoring the client hint
    pub force_stream_format: Option<StreamMode>,
    /// JSON schema file; the built-in schema is used when unset
    pub schema_path: Option<PathBuf>,
    /// Basic auth settings, when enabled
    pub auth: Option<AuthConfig>,
}

/// Where basic auth credentials live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    /// Collection holding user records
    pub collection: String,
    /// Field holding the user name
    pub user_path: String,
    /// Field holding the bcrypt hash of the password
    pub pass_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            heartbeat_interval: Duration::from_secs(5),
            listener_buffer: 64,
            force_stream_format: None,
            schema_path: None,
            auth: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let host = lookup("HOST").unwrap_or(defaults.host);

        let port = match lookup("PORT") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidPort)?,
            None => defaults.port,
        };

        let heartbeat_interval = match lookup("HEARTBEAT_INTERVAL_SECS") {
            Some(raw) => match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => return Err(ConfigError::InvalidHeartbeat(raw)),
            },
            None => defaults.heartbeat_interval,
        };

        let listener_buffer = match lookup("LISTENER_BUFFER") {
            Some(raw) => match raw.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => return Err(ConfigError::InvalidListenerBuffer(raw)),
            },
            None => defaults.listener_buffer,
        };

        let force_stream_format = lookup("FORCE_STREAM_FORMAT")
            .filter(|raw| !raw.is_empty())
            .map(|raw| {
                raw.parse()
                    .map_err(|_| ConfigError::InvalidStreamFormat(raw))
            })
            .transpose()?;

        let schema_path = lookup("SCHEMA_PATH").map(PathBuf::from);

        let auth = lookup("AUTH_COLLECTION").map(|collection| AuthConfig {
            collection,
            user_path: lookup("AUTH_USER_PATH").unwrap_or_else(|| "user".to_string()),
            pass_path: lookup("AUTH_PASS_PATH").unwrap_or_else(|| "pass_hash".to_string()),
        });

        Ok(Self {
            host,
            port,
            heartbeat_interval,
            listener_buffer,
            force_stream_format,
            schema_path,
            auth,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Invalid HEARTBEAT_INTERVAL_SECS value: {0}")]
    InvalidHeartbeat(String),

    #[error("Invalid LISTENER_BUFFER value: {0}")]
    InvalidListenerBuffer(String),

    #[error("Invalid FORCE_STREAM_FORMAT value: {0} (expected full or diff)")]
    InvalidStreamFormat(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.listener_buffer, 64);
        assert!(config.force_stream_format.is_none());
        assert!(config.auth.is_none());
    }

    #[test]
    fn overrides() {
        let config = load(&[
            ("PORT", "8080"),
            ("HEARTBEAT_INTERVAL_SECS", "30"),
            ("FORCE_STREAM_FORMAT", "diff"),
            ("AUTH_COLLECTION", "users"),
        ])
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.force_stream_format, Some(StreamMode::Diff));

        let auth = config.auth.unwrap();
        assert_eq!(auth.collection, "users");
        assert_eq!(auth.user_path, "user");
        assert_eq!(auth.pass_path, "pass_hash");
    }

    #[test]
    fn invalid_values() {
        assert!(matches!(load(&[("PORT", "http")]), Err(ConfigError::InvalidPort)));
        assert!(matches!(
            load(&[("HEARTBEAT_INTERVAL_SECS", "0")]),
            Err(ConfigError::InvalidHeartbeat(_))
        ));
        assert!(matches!(
            load(&[("FORCE_STREAM_FORMAT", "delta")]),
            Err(ConfigError::InvalidStreamFormat(_))
        ));
    }
}
