//! Error types for the Liveset engine.

use crate::{CollectionName, RecordId};
use thiserror::Error;

/// All possible errors from the Liveset engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Lookup errors
    #[error("collection not found: {0}")]
    CollectionNotFound(CollectionName),

    #[error("record not found: {0}")]
    RecordNotFound(RecordId),

    // Validation errors
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    // Query errors
    #[error("unknown path: {0}")]
    UnknownPath(String),

    #[error("unknown filter operator: {0}")]
    UnknownOperator(String),

    #[error("invalid value for '{path}': {reason}")]
    InvalidFilterValue { path: String, reason: String },

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    // Write errors
    #[error("record already exists: {0}")]
    RecordAlreadyExists(RecordId),

    #[error("version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: String, actual: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the error was caused by a malformed request rather than by
    /// store state.
    pub fn is_bad_request(&self) -> bool {
        matches!(
            self,
            Error::CollectionNotFound(_)
                | Error::InvalidPayload(_)
                | Error::MissingRequiredField(_)
                | Error::TypeMismatch { .. }
                | Error::UnknownPath(_)
                | Error::UnknownOperator(_)
                | Error::InvalidFilterValue { .. }
                | Error::InvalidQuery(_)
        )
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::CollectionNotFound("users".into());
        assert_eq!(err.to_string(), "collection not found: users");

        let err = Error::VersionMismatch {
            expected: "etag:aa".into(),
            actual: "etag:bb".into(),
        };
        assert_eq!(
            err.to_string(),
            "version mismatch: expected etag:aa, got etag:bb"
        );

        let err = Error::InvalidFilterValue {
            path: "num".into(),
            reason: "expected Int".into(),
        };
        assert_eq!(err.to_string(), "invalid value for 'num': expected Int");
    }

    #[test]
    fn classification() {
        assert!(Error::UnknownPath("nope".into()).is_bad_request());
        assert!(Error::UnknownOperator("like".into()).is_bad_request());
        assert!(!Error::RecordNotFound("x".into()).is_bad_request());
        assert!(!Error::VersionMismatch {
            expected: "a".into(),
            actual: "b".into()
        }
        .is_bad_request());
    }
}
