//! Single-call provider.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::encode::{data_uri_from_base64, inline_or_remote, DEFAULT_IMAGE_MIME};
use crate::error::ProviderError;
use crate::types::{non_empty, DirectErrorBody, DirectRequest, DirectResponse};
use crate::{endpoint, GeneratedImage, ImageProvider, ImageSource};

/// Configuration for [`DirectProvider`].
#[derive(Debug, Clone)]
pub struct DirectProviderConfig {
    /// Provider base URL.
    pub base_url: String,
    /// Bearer API key.
    pub api_key: String,
    /// Model name.
    pub model: String,
    /// Requested image size, e.g. `1024x1024`.
    pub size: String,
    /// Path of the generation endpoint.
    pub path: String,
    /// HTTP timeout for the whole call.
    pub request_timeout: Duration,
}

impl DirectProviderConfig {
    /// Defaults for everything except the endpoint and key.
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: "nano-banana-fast".to_string(),
            size: "1024x1024".to_string(),
            path: "/v1/images/generations".to_string(),
            request_timeout: Duration::from_secs(120),
        }
    }

    /// Set the model name.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

/// Provider that generates an image in one blocking HTTP call.
#[derive(Debug, Clone)]
pub struct DirectProvider {
    client: Client,
    config: DirectProviderConfig,
}

impl DirectProvider {
    /// Create a direct provider.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Configuration` if the base URL is empty or the
    /// HTTP client cannot be built.
    pub fn new(mut config: DirectProviderConfig) -> Result<Self, ProviderError> {
        if config.base_url.trim().is_empty() {
            return Err(ProviderError::Configuration("provider base URL is empty".into()));
        }
        config.base_url = config.base_url.trim_end_matches('/').to_string();

        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ProviderError::Configuration(e.to_string()))?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl ImageProvider for DirectProvider {
    async fn generate(&self, prompt: &str) -> Result<GeneratedImage, ProviderError> {
        let url = endpoint(&self.config.base_url, &self.config.path);
        let request = DirectRequest {
            model: &self.config.model,
            prompt,
            size: &self.config.size,
            n: 1,
            response_format: "b64_json",
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::Submission(format!("provider request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let reason = response
                .json::<DirectErrorBody>()
                .await
                .ok()
                .map(|body| body.error.message().to_string())
                .filter(|message| !message.trim().is_empty())
                .unwrap_or_else(|| format!("HTTP {status}"));
            return Err(ProviderError::Failed { reason });
        }

        let body: DirectResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Submission(format!("provider request failed: {e}")))?;

        let Some(image) = body.data.first() else {
            return Err(ProviderError::NoOutput);
        };

        if let Some(encoded) = non_empty(image.b64_json.as_deref()) {
            return Ok(GeneratedImage {
                image_ref: data_uri_from_base64(DEFAULT_IMAGE_MIME, encoded),
                source: ImageSource::Inline,
            });
        }

        match non_empty(image.url.as_deref()) {
            Some(url) => Ok(inline_or_remote(&self.client, url).await),
            None => Err(ProviderError::NoOutput),
        }
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}
