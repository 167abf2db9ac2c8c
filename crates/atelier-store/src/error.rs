//! Error types for atelier storage.

use atelier_core::{GenerationId, GenerationStatus};

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record.
        entity: &'static str,
        /// The missing ID.
        id: String,
    },

    /// Account already open.
    #[error("account already exists: {account_id}")]
    AccountExists {
        /// The duplicate account ID.
        account_id: String,
    },

    /// The balance guard rejected a debit.
    #[error("insufficient balance: balance={balance}, required={required}")]
    InsufficientBalance {
        /// Current balance.
        balance: i64,
        /// Required amount.
        required: i64,
    },

    /// Ledger amounts are magnitudes and must be positive.
    #[error("invalid amount: {0}")]
    InvalidAmount(i64),

    /// The daily reward was already claimed today.
    #[error("already checked in today")]
    AlreadyCheckedIn,

    /// A settled generation cannot change state again.
    #[error("generation {id} is already {status}")]
    InvalidTransition {
        /// The generation ID.
        id: GenerationId,
        /// Its current (terminal) status.
        status: GenerationStatus,
    },
}

impl StoreError {
    pub(crate) fn account_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            entity: "account",
            id: id.to_string(),
        }
    }

    pub(crate) fn generation_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            entity: "generation",
            id: id.to_string(),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}
