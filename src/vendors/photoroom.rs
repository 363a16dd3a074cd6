//! `PhotoRoom` API client (AI image editing).

use super::{create_http_client, image_part, transport_error, VendorError};
use bytes::Bytes;
use reqwest::multipart::Form;
use reqwest::Client as HttpClient;
use tracing::{error, info};

const SERVICE: &str = "PhotoRoom";

/// Client for the `PhotoRoom` v2 editing API
pub struct PhotoRoomClient {
    http: HttpClient,
    base_url: String,
    api_key: String,
}

impl PhotoRoomClient {
    /// Create a client for the given base URL and API key
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: create_http_client(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Run the AI edit pipeline over an image.
    ///
    /// Posts the image to the v2 edit endpoint with the original framing
    /// preserved and returns the processed image bytes.
    ///
    /// # Errors
    ///
    /// Returns a [`VendorError`] on timeout, transport failure, or a
    /// non-success response.
    pub async fn edit(&self, image: Bytes) -> Result<Bytes, VendorError> {
        let form = Form::new()
            .part("imageFile", image_part(image))
            .text("referenceBox", "originalImage");

        let url = format!("{}/v2/edit", self.base_url);

        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
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
            info!("PhotoRoom edit successful ({} bytes)", bytes.len());
            Ok(bytes)
        } else {
            let message = response.text().await.unwrap_or_default();
            error!("PhotoRoom API error {status}: {message}");
            Err(VendorError::Api {
                service: SERVICE,
                status: status.as_u16(),
                message,
            })
        }
    }
}
