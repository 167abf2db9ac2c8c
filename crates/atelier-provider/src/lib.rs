//! Image generation provider clients for atelier.
//!
//! An [`ImageProvider`] turns a prompt into an image reference. Two
//! interchangeable implementations exist; a deployment picks one:
//!
//! - [`TaskProvider`]: submits a task, then polls on a fixed interval until the
//!   task succeeds, fails, or the attempt budget runs out
//! - [`DirectProvider`]: a single synchronous generation call
//!
//! Finished images are downloaded and returned as `data:` URIs so records do
//! not depend on the provider's short-lived URLs.
//!
//! Providers are stateless: they never touch the ledger or generation records.
//!
//! # Example
//!
//! ```no_run
//! use atelier_provider::{ImageProvider, TaskProvider, TaskProviderConfig};
//!
//! # async fn example() -> Result<(), atelier_provider::ProviderError> {
//! let provider = TaskProvider::new(TaskProviderConfig::new(
//!     "https://api.example.com",
//!     "provider-api-key",
//! ))?;
//!
//! let image = provider.generate("a cat in a spacesuit").await?;
//! println!("{}", image.image_ref);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod direct;
pub mod encode;
mod error;
mod task;
mod types;

pub use direct::{DirectProvider, DirectProviderConfig};
pub use error::ProviderError;
pub use task::{TaskProvider, TaskProviderConfig};

use async_trait::async_trait;
use serde::Serialize;

/// Where a generated image reference points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageSource {
    /// A self-contained `data:` URI.
    Inline,
    /// The provider's URL, kept because the download failed.
    Remote,
}

/// A successfully generated image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedImage {
    /// Data URI or URL of the image.
    pub image_ref: String,
    /// Kind of reference.
    pub source: ImageSource,
}

/// An external image generation service.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Generate one image for `prompt`.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] when submission fails, the provider reports
    /// a failure, the task yields no image, or the poll budget runs out.
    async fn generate(&self, prompt: &str) -> Result<GeneratedImage, ProviderError>;

    /// Model name recorded on generation records.
    fn model(&self) -> &str;
}

/// Join a base URL and a path, tolerating slashes on either side.
pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
