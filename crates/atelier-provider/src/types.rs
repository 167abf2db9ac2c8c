//! Provider wire types.

use serde::{Deserialize, Serialize};

// ============================================================================
// Task API
// ============================================================================

/// Body of the create-task call.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateTaskRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub image_size: &'a str,
    pub aspect_ratio: &'a str,
    /// `"-1"` selects polling mode instead of a callback.
    pub web_hook: &'a str,
}

/// Body of the poll-result call.
#[derive(Debug, Serialize)]
pub(crate) struct PollRequest<'a> {
    pub id: &'a str,
}

/// Common response envelope: `code == 0` means the call was accepted.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub code: Option<i64>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    pub fn is_ok(&self) -> bool {
        self.code == Some(0)
    }

    /// The provider's own message, if it sent a non-empty one.
    pub fn message(&self) -> Option<&str> {
        non_empty(self.msg.as_deref()).or_else(|| non_empty(self.error.as_deref()))
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreatedTask {
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum TaskStatus {
    Running,
    Succeeded,
    Failed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TaskResult {
    pub status: TaskStatus,
    #[serde(default)]
    pub progress: Option<serde_json::Value>,
    #[serde(default)]
    pub results: Option<Vec<TaskOutput>>,
    #[serde(default)]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl TaskResult {
    /// URL of the first produced image.
    pub fn first_url(&self) -> Option<&str> {
        self.results
            .as_deref()
            .and_then(|results| results.first())
            .and_then(|output| non_empty(output.url.as_deref()))
    }

    /// Failure reason, falling back to the generic error field.
    pub fn failure(&self) -> Option<&str> {
        non_empty(self.failure_reason.as_deref()).or_else(|| non_empty(self.error.as_deref()))
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct TaskOutput {
    #[serde(default)]
    pub url: Option<String>,
}

// ============================================================================
// Direct API
// ============================================================================

#[derive(Debug, Serialize)]
pub(crate) struct DirectRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub size: &'a str,
    pub n: u32,
    pub response_format: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DirectResponse {
    #[serde(default)]
    pub data: Vec<DirectImage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DirectImage {
    #[serde(default)]
    pub b64_json: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Error body of the direct API: `{"error": {"message": ..}}` or `{"error": ".."}`.
#[derive(Debug, Deserialize)]
pub(crate) struct DirectErrorBody {
    pub error: DirectErrorDetail,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum DirectErrorDetail {
    Object { message: String },
    Text(String),
}

impl DirectErrorDetail {
    pub fn message(&self) -> &str {
        match self {
            Self::Object { message } | Self::Text(message) => message,
        }
    }
}

pub(crate) fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
