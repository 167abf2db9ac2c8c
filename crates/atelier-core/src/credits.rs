//! Credit transaction types for atelier.
//!
//! Every balance change appends exactly one [`Transaction`]. The log is
//! append-only; the account balance is derived from it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AccountId, GenerationId, TransactionId};

/// An immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction ID (ULID for time-ordering).
    pub id: TransactionId,

    /// The account whose balance was affected.
    pub account_id: AccountId,

    /// Signed amount. Positive = credit, negative = debit.
    pub amount: i64,

    /// Cause of the balance change.
    pub kind: TransactionKind,

    /// Balance after this transaction was applied.
    pub balance_after: i64,

    /// Human-readable description.
    pub description: String,

    /// The generation this entry pays for or refunds, if any.
    pub generation_id: Option<GenerationId>,

    /// When the transaction was created.
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Build a transaction entry with a fresh ID and timestamp.
    ///
    /// `amount` is taken as signed; callers pass a negative value for debits.
    #[must_use]
    pub fn new(
        account_id: AccountId,
        amount: i64,
        kind: TransactionKind,
        balance_after: i64,
        description: impl Into<String>,
        generation_id: Option<GenerationId>,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            account_id,
            amount,
            kind,
            balance_after,
            description: description.into(),
            generation_id,
            created_at: Utc::now(),
        }
    }
}

/// Type of credit transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    /// Daily check-in reward.
    Daily,

    /// Credits spent on an image generation.
    Generate,

    /// Credits deposited (plan purchase or opening grant).
    Deposit,

    /// Credits returned after a failed generation.
    Refund,
}

impl TransactionKind {
    /// The canonical upper-case name, as stored in SQL backends.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "DAILY",
            Self::Generate => "GENERATE",
            Self::Deposit => "DEPOSIT",
            Self::Refund => "REFUND",
        }
    }

    /// Parse the canonical name.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "DAILY" => Some(Self::Daily),
            "GENERATE" => Some(Self::Generate),
            "DEPOSIT" => Some(Self::Deposit),
            "REFUND" => Some(Self::Refund),
            _ => None,
        }
    }

    /// Check if this kind adds credits.
    #[must_use]
    pub const fn is_credit(&self) -> bool {
        matches!(self, Self::Daily | Self::Deposit | Self::Refund)
    }

    /// Check if this kind removes credits.
    #[must_use]
    pub const fn is_debit(&self) -> bool {
        matches!(self, Self::Generate)
    }
}
