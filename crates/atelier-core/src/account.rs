//! Account types for atelier.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::AccountId;

/// A credit account.
///
/// `balance` is a cached projection of the account's transaction log and is
/// never negative after a completed operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// The account ID (the authentication subject).
    pub id: AccountId,

    /// Current spendable credits.
    pub balance: i64,

    /// When the daily reward was last claimed, if ever.
    pub last_check_in: Option<DateTime<Utc>>,

    /// When the account was created.
    pub created_at: DateTime<Utc>,

    /// When the account was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a new account with zero balance.
    #[must_use]
    pub fn new(id: AccountId) -> Self {
        let now = Utc::now();
        Self {
            id,
            balance: 0,
            last_check_in: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if the account can cover a debit of `amount`.
    #[must_use]
    pub fn has_sufficient_balance(&self, amount: i64) -> bool {
        self.balance >= amount
    }

    /// Whether the daily reward was already claimed on the UTC day of `now`.
    #[must_use]
    pub fn checked_in_on(&self, now: DateTime<Utc>) -> bool {
        self.last_check_in
            .is_some_and(|last| last.date_naive() == now.date_naive())
    }
}
