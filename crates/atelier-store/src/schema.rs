//! Column families used by the `RocksDB` backend.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Account records, keyed by `account_id`.
    pub const ACCOUNTS: &str = "accounts";

    /// Ledger transactions, keyed by `transaction_id` (ULID).
    pub const TRANSACTIONS: &str = "transactions";

    /// Index: transactions by account, keyed by `account_id || transaction_id`.
    /// Value is empty (index only).
    pub const TRANSACTIONS_BY_ACCOUNT: &str = "transactions_by_account";

    /// Generation records, keyed by `generation_id`.
    pub const GENERATIONS: &str = "generations";

    /// Index: generations by account, keyed by
    /// `account_id || created_millis || generation_id`. Value is empty.
    pub const GENERATIONS_BY_ACCOUNT: &str = "generations_by_account";

    /// Index: completed generations, keyed by `created_millis || generation_id`.
    /// Value is empty.
    pub const GALLERY: &str = "gallery";

    /// Likes, keyed by `generation_id || account_id`. Value is empty.
    pub const LIKES: &str = "likes";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::ACCOUNTS,
        cf::TRANSACTIONS,
        cf::TRANSACTIONS_BY_ACCOUNT,
        cf::GENERATIONS,
        cf::GENERATIONS_BY_ACCOUNT,
        cf::GALLERY,
        cf::LIKES,
    ]
}
