//! Clients for external image-processing services.
//!
//! Each vendor is an opaque capability: image bytes in, processed image
//! bytes out. Requests carry a bounded timeout so a stuck vendor cannot pin
//! a worker; a timeout or transport failure is a retryable user-facing
//! error, never a crash.

/// `PhotoRoom` AI editing client
pub mod photoroom;
/// Remove.bg background removal client
pub mod removebg;

pub use photoroom::PhotoRoomClient;
pub use removebg::RemoveBgClient;

use crate::config::{Settings, VENDOR_TIMEOUT_SECS};
use bytes::Bytes;
use reqwest::Client as HttpClient;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// The configured vendor clients; a missing API key disables that feature
pub struct VendorClients {
    /// AI editing, present when `PHOTOROOM_API_KEY` is set
    pub photoroom: Option<PhotoRoomClient>,
    /// Background removal, present when `REMOVEBG_API_KEY` is set
    pub removebg: Option<RemoveBgClient>,
}

impl VendorClients {
    /// Build clients for every configured vendor
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        let photoroom = settings
            .photoroom_api_key
            .as_ref()
            .map(|key| PhotoRoomClient::new(settings.photoroom_api_url.clone(), key.clone()));
        let removebg = settings
            .removebg_api_key
            .as_ref()
            .map(|key| RemoveBgClient::new(settings.removebg_api_url.clone(), key.clone()));

        if !settings.has_any_vendor() {
            warn!("No vendor API keys configured; only local processing is available");
        }

        Self {
            photoroom,
            removebg,
        }
    }
}

/// Errors from a vendor API round-trip
#[derive(Debug, Error)]
pub enum VendorError {
    /// The request exceeded the configured timeout
    #[error("{0} request timed out")]
    Timeout(&'static str),
    /// Connectivity failure before a response arrived
    #[error("{service} transport error: {source}")]
    Transport {
        /// Vendor name
        service: &'static str,
        /// Underlying reqwest error
        source: reqwest::Error,
    },
    /// No API key is configured for this vendor
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
    /// The vendor answered with a non-success status
    #[error("{service} returned HTTP {status}: {message}")]
    Api {
        /// Vendor name
        service: &'static str,
        /// HTTP status code
        status: u16,
        /// Response body or mapped explanation
        message: String,
    },
}

/// Creates an HTTP client configured with the standard vendor timeout.
///
/// The timeout prevents infinite hangs when a vendor is slow or unresponsive.
#[must_use]
pub(crate) fn create_http_client() -> HttpClient {
    HttpClient::builder()
        .timeout(Duration::from_secs(VENDOR_TIMEOUT_SECS))
        .build()
        .unwrap_or_else(|_| HttpClient::new())
}

/// Map a reqwest failure to a [`VendorError`], distinguishing timeouts
pub(crate) fn transport_error(service: &'static str, source: reqwest::Error) -> VendorError {
    if source.is_timeout() {
        VendorError::Timeout(service)
    } else {
        VendorError::Transport { service, source }
    }
}

/// Build the multipart image part both vendors expect.
///
/// `Bytes` clones are reference-counted, so the fallback to an untyped part
/// does not copy the payload.
pub(crate) fn image_part(image: Bytes) -> reqwest::multipart::Part {
    reqwest::multipart::Part::stream(image.clone())
        .file_name("image.jpg")
        .mime_str("image/jpeg")
        .unwrap_or_else(|_| reqwest::multipart::Part::stream(image).file_name("image.jpg"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_service() {
        let err = VendorError::Api {
            service: "Remove.bg",
            status: 402,
            message: "insufficient credits".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Remove.bg returned HTTP 402: insufficient credits"
        );

        let err = VendorError::Timeout("PhotoRoom");
        assert_eq!(err.to_string(), "PhotoRoom request timed out");
    }
}
