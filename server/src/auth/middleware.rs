//! Authentication extractor.
//!
//! Reads `Authorization: Basic ...`, looks the user up in the configured
//! collection and verifies the password against its bcrypt hash.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use liveset_engine::{FilterOp, Path, QuerySpec};
use serde_json::Value;

use crate::config::AuthConfig;
use crate::error::AppError;
use crate::AppState;

/// Identity resolved for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthUser {
    /// No credentials were sent, or auth is not configured
    Anonymous,
    /// Credentials matched a user record
    User { name: String },
}

impl AuthUser {
    /// Name for logging.
    pub fn name(&self) -> &str {
        match self {
            AuthUser::Anonymous => "anonymous",
            AuthUser::User { name } => name,
        }
    }
}

/// Hash a password the way user records store it.
pub fn hash_password(password: &str) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(password, bcrypt::DEFAULT_COST)
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(auth) = state.config.auth.as_ref() else {
            return Ok(AuthUser::Anonymous);
        };

        let credentials = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(basic_credentials);

        match credentials {
            Some(encoded) => authenticate(state, auth, encoded).await,
            None => Ok(AuthUser::Anonymous),
        }
    }
}

/// Credentials of a `Basic` authorization value. Other schemes yield `None`.
fn basic_credentials(header: &str) -> Option<&str> {
    let (scheme, value) = header.trim().split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("basic")
        .then(|| value.trim())
}

/// Decode `base64(user:password)`.
fn decode_credentials(encoded: &str) -> Result<(String, String), AppError> {
    let decoded = STANDARD
        .decode(encoded)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| AppError::BadRequest("malformed basic credentials".to_string()))?;

    let (name, password) = decoded
        .split_once(':')
        .ok_or_else(|| AppError::BadRequest("basic credentials lack ':'".to_string()))?;

    Ok((name.to_string(), password.to_string()))
}

async fn authenticate(
    state: &AppState,
    auth: &AuthConfig,
    encoded: &str,
) -> Result<AuthUser, AppError> {
    let (name, password) = decode_credentials(encoded)?;

    let spec = QuerySpec::new().filter(auth.user_path.as_str(), FilterOp::Eq, name.as_str());
    let users = state.store.query(&auth.collection, &spec).map_err(|e| {
        tracing::error!(collection = %auth.collection, "User lookup failed: {}", e);
        AppError::Internal("user lookup failed".to_string())
    })?;

    let user = match users.as_slice() {
        [user] => user,
        [] => {
            tracing::debug!(user = %name, "Unknown user");
            return Err(AppError::Unauthorized);
        }
        _ => {
            tracing::warn!(user = %name, matches = users.len(), "Ambiguous user name");
            return Err(AppError::Unauthorized);
        }
    };

    let pass_path = state
        .store
        .schema()
        .collection(&auth.collection)
        .and_then(|schema| Path::resolve(schema, &auth.pass_path))
        .map_err(|e| AppError::Internal(format!("password path: {}", e)))?;

    let hash = match pass_path.get(user) {
        Some(Value::String(hash)) => hash,
        None | Some(Value::Null) => {
            return Err(AppError::Internal("user password hash not set".to_string()))
        }
        Some(_) => {
            return Err(AppError::Internal(
                "user password hash is not a string".to_string(),
            ))
        }
    };

    let verified = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| AppError::Internal(format!("password check failed: {}", e)))?;

    match verified {
        Ok(true) => {}
        Ok(false) => {
            tracing::debug!(user = %name, "Wrong password");
            return Err(AppError::Unauthorized);
        }
        Err(e) => {
            tracing::warn!(user = %name, record_id = %user.id, "Unusable password hash: {}", e);
            return Err(AppError::Unauthorized);
        }
    }

    tracing::trace!(user = %name, record_id = %user.id, "Authenticated");
    Ok(AuthUser::User { name })
}
