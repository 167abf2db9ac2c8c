//! Storage layer for atelier.
//!
//! This crate persists the credit ledger (accounts plus an append-only
//! transaction log) and generation records. Three backends implement the same
//! traits:
//!
//! - [`MemoryStore`]: in-process maps, for tests and single-node demos
//! - `RocksStore`: `RocksDB` column families (feature `rocksdb-backend`)
//! - [`PgStore`]: PostgreSQL through `sqlx`, with guarded `UPDATE`s
//!
//! # Guarded debits
//!
//! A debit applies only while `balance >= amount`, checked in the same unit
//! of work that writes the balance and the transaction row. Two concurrent
//! debits against one account can never both pass a stale balance check.
//!
//! # Example
//!
//! ```no_run
//! use atelier_core::{AccountId, TransactionKind};
//! use atelier_store::{LedgerEntry, LedgerStore, MemoryStore};
//!
//! # async fn example() -> atelier_store::Result<()> {
//! let store = MemoryStore::new();
//! let account_id = AccountId::generate();
//! store.open_account(&account_id, 10).await?;
//!
//! let tx = store
//!     .debit(LedgerEntry::new(account_id, 5, TransactionKind::Generate, "Image generation"))
//!     .await?;
//! assert_eq!(tx.balance_after, 5);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod ledger;
pub mod memory;
pub mod postgres;
#[cfg(feature = "rocksdb-backend")]
pub mod keys;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
#[cfg(feature = "rocksdb-backend")]
pub mod schema;

pub use error::{Result, StoreError};
pub use ledger::LedgerEntry;
pub use memory::MemoryStore;
pub use postgres::PgStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use atelier_core::{Account, AccountId, GenerationId, GenerationRecord, Transaction};

/// Ledger operations: accounts and their transaction log.
///
/// Every mutating call writes the balance and exactly one transaction row in
/// a single persistence unit.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open an account, depositing `opening_credits` when positive.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AccountExists` if the account is already open.
    async fn open_account(&self, account_id: &AccountId, opening_credits: i64) -> Result<Account>;

    /// Get an account by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>>;

    /// Remove `entry.amount` credits, only if the balance covers it.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the account doesn't exist.
    /// - `StoreError::InsufficientBalance` if the guard rejects the debit.
    /// - `StoreError::InvalidAmount` if the amount is not positive.
    async fn debit(&self, entry: LedgerEntry) -> Result<Transaction>;

    /// Add `entry.amount` credits.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the account doesn't exist.
    /// - `StoreError::InvalidAmount` if the amount is not positive.
    async fn credit(&self, entry: LedgerEntry) -> Result<Transaction>;

    /// Grant the daily reward and stamp `last_check_in`.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the account doesn't exist.
    /// - `StoreError::AlreadyCheckedIn` if the reward was claimed on the UTC day of `now`.
    async fn check_in(
        &self,
        account_id: &AccountId,
        reward: i64,
        now: DateTime<Utc>,
    ) -> Result<Transaction>;

    /// List transactions for an account, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_transactions(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Transaction>>;
}

/// Input for [`GenerationStore::create_generation`].
#[derive(Debug, Clone)]
pub struct NewGeneration {
    /// The requesting account.
    pub account_id: AccountId,
    /// Trimmed prompt.
    pub prompt: String,
    /// Trimmed negative prompt.
    pub negative_prompt: Option<String>,
    /// Provider model name.
    pub model: String,
    /// Price fixed for this request.
    pub cost: i64,
}

/// Generation record operations.
#[async_trait]
pub trait GenerationStore: Send + Sync {
    /// Insert a new record in `Processing`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn create_generation(&self, request: NewGeneration) -> Result<GenerationRecord>;

    /// Get a record by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_generation(&self, generation_id: &GenerationId) -> Result<Option<GenerationRecord>>;

    /// Move a `Processing` record to `Completed` with its image reference.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the record doesn't exist.
    /// - `StoreError::InvalidTransition` if the record is already terminal.
    async fn complete_generation(
        &self,
        generation_id: &GenerationId,
        image_ref: &str,
    ) -> Result<GenerationRecord>;

    /// Move a `Processing` record to `Failed` with a reason.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the record doesn't exist.
    /// - `StoreError::InvalidTransition` if the record is already terminal.
    async fn fail_generation(
        &self,
        generation_id: &GenerationId,
        reason: &str,
    ) -> Result<GenerationRecord>;

    /// List an account's records, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_generations(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<GenerationRecord>>;
}

/// A completed generation in the community feed.
#[derive(Debug, Clone, Serialize)]
pub struct GalleryItem {
    /// The completed record.
    pub record: GenerationRecord,
    /// Number of likes.
    pub likes: u64,
}

/// Result of toggling a like.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LikeState {
    /// Whether the caller now likes the generation.
    pub liked: bool,
    /// Total likes after the toggle.
    pub count: u64,
}

/// Community gallery: the completed-generation feed and likes.
#[async_trait]
pub trait GalleryStore: Send + Sync {
    /// Completed generations, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn gallery(&self, limit: usize) -> Result<Vec<GalleryItem>>;

    /// Like the generation if not yet liked by `account_id`, unlike otherwise.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the generation doesn't exist or isn't completed.
    async fn toggle_like(
        &self,
        account_id: &AccountId,
        generation_id: &GenerationId,
    ) -> Result<LikeState>;
}
