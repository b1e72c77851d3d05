//! Unified error handling for the server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use liveset_engine::Error as EngineError;
use serde::Serialize;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Engine(e) => match e {
                EngineError::CollectionNotFound(_) | EngineError::RecordNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                EngineError::VersionMismatch { .. } => StatusCode::PRECONDITION_FAILED,
                EngineError::RecordAlreadyExists(_) => StatusCode::CONFLICT,
                e if e.is_bad_request() => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        let (error_message, details) = match &self {
            AppError::Engine(EngineError::VersionMismatch { actual, .. }) => {
                tracing::debug!(current = %actual, "Precondition failed");
                ("Precondition failed".to_string(), Some(self.to_string()))
            }
            AppError::Engine(e) if status.is_server_error() => {
                tracing::error!("Engine error: {:?}", e);
                ("Internal server error".to_string(), Some(e.to_string()))
            }
            AppError::Engine(e) => {
                tracing::warn!("Engine error: {:?}", e);
                (e.to_string(), None)
            }
            AppError::BadRequest(msg) => (msg.clone(), None),
            AppError::Unauthorized => ("Unauthorized".to_string(), None),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                ("Internal server error".to_string(), Some(msg.clone()))
            }
        };

        let body = Json(ErrorResponse {
            error: error_message,
            details,
        });

        (status, body).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;
