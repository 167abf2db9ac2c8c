//! Key encoding for the `RocksDB` column families.
//!
//! Every key is a concatenation of fixed-width big-endian parts, so
//! lexicographic key order matches time order within a prefix.

use chrono::{DateTime, Utc};

use atelier_core::{AccountId, GenerationId, TransactionId};

const ID_LEN: usize = 16;
const MILLIS_LEN: usize = 8;

/// Milliseconds since the epoch as a sortable big-endian prefix.
///
/// Instants before 1970 clamp to zero.
fn millis(at: DateTime<Utc>) -> [u8; MILLIS_LEN] {
    u64::try_from(at.timestamp_millis())
        .unwrap_or(0)
        .to_be_bytes()
}

fn id_at(key: &[u8], start: usize) -> Option<[u8; ID_LEN]> {
    key.get(start..start + ID_LEN)?.try_into().ok()
}

// ============================================================================
// Accounts and transactions
// ============================================================================

/// Account key: `account_id (16 bytes)`.
#[must_use]
pub fn account_key(account_id: &AccountId) -> Vec<u8> {
    account_id.as_bytes().to_vec()
}

/// Transaction key: `transaction_id (16 bytes)`.
#[must_use]
pub fn transaction_key(transaction_id: &TransactionId) -> Vec<u8> {
    transaction_id.to_bytes().to_vec()
}

/// Account-transaction index key: `account_id || transaction_id`.
///
/// Transaction IDs are monotonic ULIDs, so entries sort by commit order.
#[must_use]
pub fn account_transaction_key(account_id: &AccountId, transaction_id: &TransactionId) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 * ID_LEN);
    key.extend_from_slice(account_id.as_bytes());
    key.extend_from_slice(&transaction_id.to_bytes());
    key
}

/// Prefix for all index entries belonging to an account.
#[must_use]
pub fn account_prefix(account_id: &AccountId) -> Vec<u8> {
    account_id.as_bytes().to_vec()
}

/// Extract the transaction ID from an account-transaction index key.
#[must_use]
pub fn transaction_id_from_account_key(key: &[u8]) -> Option<TransactionId> {
    id_at(key, ID_LEN).map(TransactionId::from_bytes)
}

// ============================================================================
// Generations
// ============================================================================

/// Generation key: `generation_id (16 bytes)`.
#[must_use]
pub fn generation_key(generation_id: &GenerationId) -> Vec<u8> {
    generation_id.as_bytes().to_vec()
}

/// Account-generation index key: `account_id || created_millis || generation_id`.
#[must_use]
pub fn account_generation_key(
    account_id: &AccountId,
    created_at: DateTime<Utc>,
    generation_id: &GenerationId,
) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 * ID_LEN + MILLIS_LEN);
    key.extend_from_slice(account_id.as_bytes());
    key.extend_from_slice(&millis(created_at));
    key.extend_from_slice(generation_id.as_bytes());
    key
}

/// Extract the generation ID from an account-generation index key.
#[must_use]
pub fn generation_id_from_account_key(key: &[u8]) -> Option<GenerationId> {
    id_at(key, ID_LEN + MILLIS_LEN).map(GenerationId::from_bytes)
}

/// Gallery index key: `created_millis || generation_id`.
#[must_use]
pub fn gallery_key(created_at: DateTime<Utc>, generation_id: &GenerationId) -> Vec<u8> {
    let mut key = Vec::with_capacity(MILLIS_LEN + ID_LEN);
    key.extend_from_slice(&millis(created_at));
    key.extend_from_slice(generation_id.as_bytes());
    key
}

/// Extract the generation ID from a gallery index key.
#[must_use]
pub fn generation_id_from_gallery_key(key: &[u8]) -> Option<GenerationId> {
    id_at(key, MILLIS_LEN).map(GenerationId::from_bytes)
}

// ============================================================================
// Likes
// ============================================================================

/// Like key: `generation_id || account_id`.
#[must_use]
pub fn like_key(generation_id: &GenerationId, account_id: &AccountId) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 * ID_LEN);
    key.extend_from_slice(generation_id.as_bytes());
    key.extend_from_slice(account_id.as_bytes());
    key
}

/// Prefix for all likes of a generation.
#[must_use]
pub fn generation_prefix(generation_id: &GenerationId) -> Vec<u8> {
    generation_id.as_bytes().to_vec()
}
