//! Remove.bg API client (background removal).

use super::{create_http_client, image_part, transport_error, VendorError};
use bytes::Bytes;
use reqwest::multipart::Form;
use reqwest::Client as HttpClient;
use tracing::{error, info};

const SERVICE: &str = "Remove.bg";

/// Client for the Remove.bg v1.0 API
pub struct RemoveBgClient {
    http: HttpClient,
    base_url: String,
    api_key: String,
}

impl RemoveBgClient {
    /// Create a client for the given base URL and API key
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: create_http_client(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Remove the background from an image, returning a transparent PNG.
    ///
    /// # Errors
    ///
    /// Returns a [`VendorError`] on timeout, transport failure, or a
    /// non-success response; quota and auth failures carry an explanatory
    /// message instead of the raw body.
    pub async fn remove_background(&self, image: Bytes) -> Result<Bytes, VendorError> {
        let form = Form::new()
            .part("image_file", image_part(image))
            .text("size", "auto");

        let url = format!("{}/removebg", self.base_url);

        let response = self
            .http
            .post(&url)
            .header("X-Api-Key", &self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| transport_error(SERVICE, e))?;

        let status = response.status();
        if status.is_success() {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| transport_error(SERVICE, e))?;
            info!("Remove.bg background removal successful ({} bytes)", bytes.len());
            Ok(bytes)
        } else {
            let body = response.text().await.unwrap_or_default();
            let message = explain_status(status.as_u16(), body);
            error!("Remove.bg API error {status}: {message}");
            Err(VendorError::Api {
                service: SERVICE,
                status: status.as_u16(),
                message,
            })
        }
    }
}

/// Replace well-known Remove.bg failure codes with actionable text
fn explain_status(status: u16, body: String) -> String {
    match status {
        402 => "insufficient credits".to_string(),
        403 => "invalid API key".to_string(),
        429 => "vendor rate limit exceeded".to_string(),
        _ => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explain_status_known_codes() {
        assert_eq!(explain_status(402, String::new()), "insufficient credits");
        assert_eq!(explain_status(403, String::new()), "invalid API key");
        assert_eq!(explain_status(429, String::new()), "vendor rate limit exceeded");
        assert_eq!(
            explain_status(500, "server broke".to_string()),
            "server broke"
        );
    }
}
