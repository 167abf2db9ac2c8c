//! Create-task / poll-result provider.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::encode::inline_or_remote;
use crate::error::ProviderError;
use crate::types::{CreateTaskRequest, CreatedTask, Envelope, PollRequest, TaskResult, TaskStatus};
use crate::{endpoint, GeneratedImage, ImageProvider};

/// Reason used when the provider fails a task without saying why.
const GENERIC_FAILURE: &str = "Generation failed";

/// Configuration for [`TaskProvider`].
#[derive(Debug, Clone)]
pub struct TaskProviderConfig {
    /// Provider base URL.
    pub base_url: String,
    /// Bearer API key.
    pub api_key: String,
    /// Model name sent with each task.
    pub model: String,
    /// Requested image size.
    pub image_size: String,
    /// Requested aspect ratio.
    pub aspect_ratio: String,
    /// Path of the create-task endpoint.
    pub create_path: String,
    /// Path of the poll-result endpoint.
    pub result_path: String,
    /// Wait before each poll.
    pub poll_interval: Duration,
    /// Maximum number of polls.
    pub max_attempts: u32,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
}

impl TaskProviderConfig {
    /// Defaults for everything except the endpoint and key.
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: "nano-banana-fast".to_string(),
            image_size: "1K".to_string(),
            aspect_ratio: "1:1".to_string(),
            create_path: "/v1/draw/nano-banana".to_string(),
            result_path: "/v1/draw/result".to_string(),
            poll_interval: Duration::from_secs(2),
            max_attempts: 30,
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Set the poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the attempt budget.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the model name.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Upper bound on time spent polling, excluding request latency.
    #[must_use]
    pub fn poll_budget(&self) -> Duration {
        self.poll_interval * self.max_attempts
    }
}

/// Provider that submits a task and polls until it reaches a terminal state.
#[derive(Debug, Clone)]
pub struct TaskProvider {
    client: Client,
    config: TaskProviderConfig,
}

/// Outcome of one poll attempt.
enum Poll {
    Pending,
    Done(Result<String, ProviderError>),
}

impl TaskProvider {
    /// Create a task provider.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Configuration` if the base URL is empty, the
    /// attempt budget is zero, or the HTTP client cannot be built.
    pub fn new(mut config: TaskProviderConfig) -> Result<Self, ProviderError> {
        if config.base_url.trim().is_empty() {
            return Err(ProviderError::Configuration("provider base URL is empty".into()));
        }
        if config.max_attempts == 0 {
            return Err(ProviderError::Configuration("max_attempts must be positive".into()));
        }
        config.base_url = config.base_url.trim_end_matches('/').to_string();

        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ProviderError::Configuration(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// The provider configuration.
    #[must_use]
    pub fn config(&self) -> &TaskProviderConfig {
        &self.config
    }

    /// Create the task and return its ID.
    async fn submit(&self, prompt: &str) -> Result<String, ProviderError> {
        let url = endpoint(&self.config.base_url, &self.config.create_path);
        let request = CreateTaskRequest {
            model: &self.config.model,
            prompt,
            image_size: &self.config.image_size,
            aspect_ratio: &self.config.aspect_ratio,
            web_hook: "-1",
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
            return Err(ProviderError::Submission(format!("HTTP {status}")));
        }

        let envelope: Envelope<CreatedTask> = response
            .json()
            .await
            .map_err(|e| ProviderError::Submission(format!("provider request failed: {e}")))?;

        let task_id = envelope
            .data
            .as_ref()
            .and_then(|data| data.id.clone())
            .filter(|id| !id.is_empty());

        match task_id {
            Some(id) if envelope.is_ok() => Ok(id),
            _ => Err(ProviderError::Submission(
                envelope
                    .message()
                    .unwrap_or("failed to create task")
                    .to_string(),
            )),
        }
    }

    /// One poll. Transport faults and malformed answers are `Err` and retried.
    async fn poll(&self, task_id: &str) -> Result<Option<TaskResult>, String> {
        let url = endpoint(&self.config.base_url, &self.config.result_path);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&PollRequest { id: task_id })
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {status}"));
        }

        let envelope: Envelope<TaskResult> = response.json().await.map_err(|e| e.to_string())?;
        if !envelope.is_ok() {
            return Err(envelope.message().unwrap_or("invalid poll response").to_string());
        }
        Ok(envelope.data)
    }

    fn interpret(result: &TaskResult) -> Poll {
        match result.status {
            TaskStatus::Succeeded => {
                Poll::Done(result.first_url().map(str::to_string).ok_or(ProviderError::NoOutput))
            }
            TaskStatus::Failed => Poll::Done(Err(ProviderError::Failed {
                reason: result.failure().unwrap_or(GENERIC_FAILURE).to_string(),
            })),
            TaskStatus::Running | TaskStatus::Unknown => Poll::Pending,
        }
    }
}

#[async_trait]
impl ImageProvider for TaskProvider {
    async fn generate(&self, prompt: &str) -> Result<GeneratedImage, ProviderError> {
        let task_id = self.submit(prompt).await?;
        tracing::debug!(task_id = %task_id, "Generation task created");

        for attempt in 1..=self.config.max_attempts {
            tokio::time::sleep(self.config.poll_interval).await;

            let result = match self.poll(&task_id).await {
                Ok(Some(result)) => result,
                Ok(None) => {
                    tracing::warn!(task_id = %task_id, attempt, "Poll returned no data");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(task_id = %task_id, attempt, error = %e, "Poll failed");
                    continue;
                }
            };

            tracing::debug!(
                task_id = %task_id,
                attempt,
                status = ?result.status,
                progress = ?result.progress,
                "Polled generation task"
            );

            match Self::interpret(&result) {
                Poll::Pending => {}
                Poll::Done(Ok(url)) => return Ok(inline_or_remote(&self.client, &url).await),
                Poll::Done(Err(e)) => return Err(e),
            }
        }

        Err(ProviderError::Timeout {
            attempts: self.config.max_attempts,
        })
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}
