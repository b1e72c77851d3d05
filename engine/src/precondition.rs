//! Conditional write guard.
//!
//! A client that read a record at some etag can make its write conditional on
//! that etag still being current. The store checks this under its write lock,
//! so a rejected write never mutates anything.

use crate::{error::Result, Error, Record};

/// Check `expected` against the stored record's etag.
///
/// `None` means the write is unconditional.
pub fn check_precondition(record: &Record, expected: Option<&str>) -> Result<()> {
    match expected {
        None => Ok(()),
        Some(expected) if expected == record.etag => Ok(()),
        Some(expected) => Err(Error::VersionMismatch {
            expected: expected.to_string(),
            actual: record.etag.clone(),
        }),
    }
}

/// Normalize an `If-Match` style value: trims whitespace, the weak
/// validator prefix and surrounding quotes.
pub fn parse_if_match(raw: &str) -> Option<String> {
    let value = raw.trim();
    let value = value.strip_prefix("W/").unwrap_or(value);
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);

    if value.is_empty() || value == "*" {
        None
    } else {
        Some(value.to_string())
    }
}
