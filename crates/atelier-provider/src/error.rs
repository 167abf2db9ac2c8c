//! Provider error types.

use std::time::Duration;

/// Errors returned by an [`ImageProvider`](crate::ImageProvider).
///
/// Every variant is terminal for the generation that produced it. Transient
/// poll faults never surface here; they are retried inside the poll loop.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The task could not be created. Submission is never retried.
    ///
    /// Carries the provider's own message when it sent one.
    #[error("{0}")]
    Submission(String),

    /// The provider reported a failure. The reason is shown verbatim.
    #[error("{reason}")]
    Failed {
        /// Provider-supplied failure reason.
        reason: String,
    },

    /// The task succeeded without producing an image.
    #[error("task succeeded but no output")]
    NoOutput,

    /// Polling exhausted its attempt budget without a terminal answer.
    #[error("generation timed out after {attempts} attempts")]
    Timeout {
        /// Number of polls made.
        attempts: u32,
    },

    /// The caller's deadline expired before the provider answered.
    #[error("generation timed out after {}s", .0.as_secs())]
    DeadlineExceeded(Duration),

    /// The provider call panicked or was aborted.
    #[error("provider fault: {0}")]
    Fault(String),

    /// Invalid provider configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ProviderError {
    /// Whether the error is a timeout (poll budget or caller deadline).
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::DeadlineExceeded(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_reason_is_verbatim() {
        let err = ProviderError::Failed {
            reason: "NSFW".into(),
        };
        assert_eq!(err.to_string(), "NSFW");
    }

    #[test]
    fn submission_message_is_verbatim() {
        let err = ProviderError::Submission("insufficient quota".into());
        assert_eq!(err.to_string(), "insufficient quota");
    }

    #[test]
    fn timeout_messages() {
        assert_eq!(
            ProviderError::Timeout { attempts: 3 }.to_string(),
            "generation timed out after 3 attempts"
        );
        assert_eq!(
            ProviderError::DeadlineExceeded(Duration::from_secs(90)).to_string(),
            "generation timed out after 90s"
        );
        assert!(ProviderError::Timeout { attempts: 1 }.is_timeout());
        assert!(!ProviderError::NoOutput.is_timeout());
    }
}
