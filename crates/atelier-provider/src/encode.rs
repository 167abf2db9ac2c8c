//! Re-encoding provider output as self-contained data URIs.
//!
//! Provider image URLs are short-lived, so a finished image is downloaded and
//! stored inline. A failed download falls back to the raw URL.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;

use crate::{GeneratedImage, ImageSource};

/// MIME type used when the response doesn't name an image type.
pub const DEFAULT_IMAGE_MIME: &str = "image/png";

/// Build a `data:` URI from raw bytes.
#[must_use]
pub fn data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

/// Wrap an already base64-encoded payload as a `data:` URI.
#[must_use]
pub fn data_uri_from_base64(mime: &str, encoded: &str) -> String {
    format!("data:{mime};base64,{}", encoded.trim())
}

/// The `image/*` essence of a `Content-Type` value, if it is one.
fn image_mime(content_type: &str) -> Option<String> {
    let essence = content_type.split(';').next()?.trim().to_ascii_lowercase();
    essence.starts_with("image/").then_some(essence)
}

/// Download `url` and encode it as a data URI.
///
/// # Errors
///
/// Returns an error on transport failure or a non-2xx response.
pub async fn fetch_data_uri(client: &Client, url: &str) -> Result<String, reqwest::Error> {
    let response = client.get(url).send().await?.error_for_status()?;

    let mime = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(image_mime)
        .unwrap_or_else(|| DEFAULT_IMAGE_MIME.to_string());

    let bytes = response.bytes().await?;
    Ok(data_uri(&mime, &bytes))
}

/// Inline the image at `url`, or keep the URL if the download fails.
pub(crate) async fn inline_or_remote(client: &Client, url: &str) -> GeneratedImage {
    match fetch_data_uri(client, url).await {
        Ok(image_ref) => GeneratedImage {
            image_ref,
            source: ImageSource::Inline,
        },
        Err(e) => {
            tracing::warn!(url = %url, error = %e, "Image download failed, keeping provider URL");
            GeneratedImage {
                image_ref: url.to_string(),
                source: ImageSource::Remote,
            }
        }
    }
}
