//! Ledger entries and the balance rules shared by the key-value backends.
//!
//! The SQL backend enforces the same rules in its `UPDATE ... WHERE` guards.

use chrono::{DateTime, Utc};

use atelier_core::{Account, AccountId, GenerationId, GenerationRecord, GenerationStatus, Transaction, TransactionKind};

use crate::error::{Result, StoreError};

/// Ledger description for the daily reward.
pub const DAILY_REWARD_DESCRIPTION: &str = "Daily check-in reward";

/// Ledger description for an account's opening grant.
pub const OPENING_GRANT_DESCRIPTION: &str = "Welcome credits";

/// A requested balance change.
///
/// `amount` is a magnitude; `debit` and `credit` apply the sign.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    /// The account to change.
    pub account_id: AccountId,
    /// Positive number of credits.
    pub amount: i64,
    /// Cause of the change.
    pub kind: TransactionKind,
    /// Human-readable description.
    pub description: String,
    /// The generation this entry belongs to, if any.
    pub generation_id: Option<GenerationId>,
}

impl LedgerEntry {
    /// Create a ledger entry.
    #[must_use]
    pub fn new(
        account_id: AccountId,
        amount: i64,
        kind: TransactionKind,
        description: impl Into<String>,
    ) -> Self {
        Self {
            account_id,
            amount,
            kind,
            description: description.into(),
            generation_id: None,
        }
    }

    /// Link the entry to a generation record.
    #[must_use]
    pub fn for_generation(mut self, generation_id: GenerationId) -> Self {
        self.generation_id = Some(generation_id);
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.amount <= 0 {
            return Err(StoreError::InvalidAmount(self.amount));
        }
        Ok(())
    }

    pub(crate) fn into_transaction(self, signed_amount: i64, balance_after: i64) -> Transaction {
        Transaction::new(
            self.account_id,
            signed_amount,
            self.kind,
            balance_after,
            self.description,
            self.generation_id,
        )
    }
}

/// Apply a guarded debit to an in-memory account copy.
///
/// Leaves `account` untouched on error.
pub(crate) fn apply_debit(account: &mut Account, entry: LedgerEntry) -> Result<Transaction> {
    entry.validate()?;
    if !account.has_sufficient_balance(entry.amount) {
        return Err(StoreError::InsufficientBalance {
            balance: account.balance,
            required: entry.amount,
        });
    }

    account.balance -= entry.amount;
    account.updated_at = Utc::now();
    let amount = entry.amount;
    Ok(entry.into_transaction(-amount, account.balance))
}

/// Apply a credit to an in-memory account copy.
pub(crate) fn apply_credit(account: &mut Account, entry: LedgerEntry) -> Result<Transaction> {
    entry.validate()?;

    account.balance += entry.amount;
    account.updated_at = Utc::now();
    let amount = entry.amount;
    Ok(entry.into_transaction(amount, account.balance))
}

/// Apply the daily reward, at most once per UTC day.
pub(crate) fn apply_check_in(
    account: &mut Account,
    reward: i64,
    now: DateTime<Utc>,
) -> Result<Transaction> {
    if account.checked_in_on(now) {
        return Err(StoreError::AlreadyCheckedIn);
    }

    let entry = LedgerEntry::new(
        account.id,
        reward,
        TransactionKind::Daily,
        DAILY_REWARD_DESCRIPTION,
    );
    let tx = apply_credit(account, entry)?;
    account.last_check_in = Some(now);
    Ok(tx)
}

/// Terminal outcome applied to a generation record.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Settlement<'a> {
    Completed { image_ref: &'a str },
    Failed { reason: &'a str },
}

/// Move a `Processing` (or `Pending`) record to its terminal state.
///
/// Leaves `record` untouched on error.
pub(crate) fn apply_settlement(record: &mut GenerationRecord, settlement: Settlement<'_>) -> Result<()> {
    if record.is_terminal() {
        return Err(StoreError::InvalidTransition {
            id: record.id,
            status: record.status,
        });
    }

    match settlement {
        Settlement::Completed { image_ref } => {
            record.status = GenerationStatus::Completed;
            record.image_ref = Some(image_ref.to_string());
        }
        Settlement::Failed { reason } => {
            record.status = GenerationStatus::Failed;
            record.error_message = Some(reason.to_string());
        }
    }
    record.completed_at = Some(Utc::now());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn funded(balance: i64) -> Account {
        let mut account = Account::new(AccountId::generate());
        account.balance = balance;
        account
    }

    #[test]
    fn debit_rejects_overdraft_without_mutation() {
        let mut account = funded(4);
        let entry = LedgerEntry::new(account.id, 5, TransactionKind::Generate, "gen");

        let result = apply_debit(&mut account, entry);

        assert!(matches!(
            result,
            Err(StoreError::InsufficientBalance {
                balance: 4,
                required: 5
            })
        ));
        assert_eq!(account.balance, 4);
    }

    #[test]
    fn debit_records_negative_amount() {
        let mut account = funded(10);
        let generation_id = GenerationId::generate();
        let entry = LedgerEntry::new(account.id, 5, TransactionKind::Generate, "gen")
            .for_generation(generation_id);

        let tx = apply_debit(&mut account, entry).unwrap();

        assert_eq!(tx.amount, -5);
        assert_eq!(tx.balance_after, 5);
        assert_eq!(tx.generation_id, Some(generation_id));
        assert_eq!(account.balance, 5);
    }

    #[test]
    fn non_positive_amounts_are_rejected() {
        let mut account = funded(10);
        for amount in [0, -3] {
            let entry = LedgerEntry::new(account.id, amount, TransactionKind::Deposit, "x");
            assert!(matches!(
                apply_credit(&mut account, entry),
                Err(StoreError::InvalidAmount(_))
            ));
        }
        assert_eq!(account.balance, 10);
    }

    #[test]
    fn check_in_once_per_day() {
        let mut account = funded(0);
        let now = Utc::now();

        let tx = apply_check_in(&mut account, 10, now).unwrap();
        assert_eq!(tx.kind, TransactionKind::Daily);
        assert_eq!(account.balance, 10);

        assert!(matches!(
            apply_check_in(&mut account, 10, now),
            Err(StoreError::AlreadyCheckedIn)
        ));
        assert_eq!(account.balance, 10);

        apply_check_in(&mut account, 10, now + Duration::days(1)).unwrap();
        assert_eq!(account.balance, 20);
    }

    #[test]
    fn settlement_happens_once() {
        let mut record =
            GenerationRecord::processing(AccountId::generate(), "cat", None, "m", 5);

        apply_settlement(&mut record, Settlement::Completed { image_ref: "img" }).unwrap();
        let settled = record.clone();

        let again = apply_settlement(&mut record, Settlement::Failed { reason: "late" });
        assert!(matches!(
            again,
            Err(StoreError::InvalidTransition {
                status: GenerationStatus::Completed,
                ..
            })
        ));
        assert_eq!(record, settled);
    }
}
