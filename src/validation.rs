//! Upload validation policy.
//!
//! Checked by handlers before anything reaches the admission gate: a
//! rejected upload produces a user-facing message and never consumes a
//! rate-limit slot.

use crate::config::Settings;
use thiserror::Error;

/// Reasons an upload is rejected before admission
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Upload exceeds the configured size cap
    #[error("file too large: {actual} bytes (limit {limit})")]
    TooLarge {
        /// Reported upload size in bytes
        actual: u64,
        /// Configured maximum in bytes
        limit: u64,
    },
    /// Document MIME type is not in the accepted set
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Validate an upload's byte size and (for documents) MIME type.
///
/// Telegram photos are always re-encoded as JPEG, so photo uploads pass
/// `None` for `mime_type` and only the size check applies.
///
/// # Errors
///
/// Returns a [`ValidationError`] describing the first violated rule.
pub fn validate_upload(
    file_size: u64,
    mime_type: Option<&str>,
    settings: &Settings,
) -> Result<(), ValidationError> {
    if let Some(mime) = mime_type {
        if !settings.supported_formats().contains(&mime.to_lowercase()) {
            return Err(ValidationError::UnsupportedFormat(mime.to_string()));
        }
    }

    if file_size > settings.max_file_size_bytes {
        return Err(ValidationError::TooLarge {
            actual: file_size,
            limit: settings.max_file_size_bytes,
        });
    }

    Ok(())
}
