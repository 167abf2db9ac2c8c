//! Generation record types for atelier.
//!
//! A [`GenerationRecord`] is created in `Processing` and moves exactly once to
//! `Completed` or `Failed`. Terminal records are never reopened.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AccountId, GenerationId};

/// Persisted state of one image-generation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRecord {
    /// Unique generation ID.
    pub id: GenerationId,

    /// The account that requested (and pays for) the generation.
    pub account_id: AccountId,

    /// The prompt, trimmed.
    pub prompt: String,

    /// Optional negative prompt, trimmed.
    pub negative_prompt: Option<String>,

    /// Provider model name (informational).
    pub model: String,

    /// Lifecycle status.
    pub status: GenerationStatus,

    /// Reference to the produced image (data URI or URL).
    pub image_ref: Option<String>,

    /// Price in credits, fixed at creation.
    pub cost: i64,

    /// Failure reason for `Failed` records.
    pub error_message: Option<String>,

    /// When the request was accepted.
    pub created_at: DateTime<Utc>,

    /// When the record reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

impl GenerationRecord {
    /// Create a new record in `Processing`.
    #[must_use]
    pub fn processing(
        account_id: AccountId,
        prompt: impl Into<String>,
        negative_prompt: Option<String>,
        model: impl Into<String>,
        cost: i64,
    ) -> Self {
        Self {
            id: GenerationId::generate(),
            account_id,
            prompt: prompt.into(),
            negative_prompt,
            model: model.into(),
            status: GenerationStatus::Processing,
            image_ref: None,
            cost,
            error_message: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Whether the record has been settled.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Lifecycle status of a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GenerationStatus {
    /// Queued. Reserved; the generation flow creates records in `Processing`.
    Pending,

    /// Provider call in flight.
    Processing,

    /// Image produced.
    Completed,

    /// Generation failed; the cost was refunded if it had been debited.
    Failed,
}

impl GenerationStatus {
    /// The canonical upper-case name, as stored in SQL backends.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    /// Parse the canonical name.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(Self::Pending),
            "PROCESSING" => Some(Self::Processing),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    /// `Completed` and `Failed` are terminal.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
