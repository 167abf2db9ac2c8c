//! `RocksDB` storage implementation.
//!
//! Balance changes are read-modify-write cycles serialized by a store-wide
//! write lock and committed with one `WriteBatch`, so the account record and
//! its transaction row land together or not at all.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};

use atelier_core::{
    Account, AccountId, GenerationId, GenerationRecord, GenerationStatus, Transaction,
    TransactionKind,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::ledger::{self, LedgerEntry, Settlement, OPENING_GRANT_DESCRIPTION};
use crate::schema::{all_column_families, cf};
use crate::{GalleryItem, GalleryStore, GenerationStore, LedgerStore, LikeState, NewGeneration};

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for RocksStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksStore")
            .field("path", &self.db.path())
            .finish_non_exhaustive()
    }
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| StoreError::Database("write lock poisoned".into()))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn get<T: serde::de::DeserializeOwned>(&self, family: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(family)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    /// Collect keys under `prefix` in ascending order.
    fn prefix_keys(&self, family: &str, prefix: &[u8]) -> Result<Vec<Box<[u8]>>> {
        let cf = self.cf(family)?;
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward));

        let mut found = Vec::new();
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            found.push(key);
        }
        Ok(found)
    }

    fn like_count(&self, generation_id: &GenerationId) -> Result<u64> {
        let likes = self.prefix_keys(cf::LIKES, &keys::generation_prefix(generation_id))?;
        Ok(likes.len() as u64)
    }

    // =========================================================================
    // Write helpers (caller holds the write lock)
    // =========================================================================

    fn put_account_with_transaction(
        &self,
        batch: &mut WriteBatch,
        account: &Account,
        tx: &Transaction,
    ) -> Result<()> {
        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        let cf_tx = self.cf(cf::TRANSACTIONS)?;
        let cf_by_account = self.cf(cf::TRANSACTIONS_BY_ACCOUNT)?;

        batch.put_cf(&cf_accounts, keys::account_key(&account.id), Self::serialize(account)?);
        batch.put_cf(&cf_tx, keys::transaction_key(&tx.id), Self::serialize(tx)?);
        batch.put_cf(
            &cf_by_account,
            keys::account_transaction_key(&account.id, &tx.id),
            [],
        );
        Ok(())
    }

    fn mutate_account<F>(&self, account_id: &AccountId, op: F) -> Result<Transaction>
    where
        F: FnOnce(&mut Account) -> Result<Transaction>,
    {
        let _guard = self.lock()?;

        let mut account: Account = self
            .get(cf::ACCOUNTS, &keys::account_key(account_id))?
            .ok_or_else(|| StoreError::account_not_found(account_id))?;

        let tx = op(&mut account)?;

        let mut batch = WriteBatch::default();
        self.put_account_with_transaction(&mut batch, &account, &tx)?;
        self.write(batch)?;
        Ok(tx)
    }

    fn settle(
        &self,
        generation_id: &GenerationId,
        settlement: Settlement<'_>,
    ) -> Result<GenerationRecord> {
        let _guard = self.lock()?;

        let mut record: GenerationRecord = self
            .get(cf::GENERATIONS, &keys::generation_key(generation_id))?
            .ok_or_else(|| StoreError::generation_not_found(generation_id))?;
        ledger::apply_settlement(&mut record, settlement)?;

        let cf_generations = self.cf(cf::GENERATIONS)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(
            &cf_generations,
            keys::generation_key(generation_id),
            Self::serialize(&record)?,
        );
        if record.status == GenerationStatus::Completed {
            let cf_gallery = self.cf(cf::GALLERY)?;
            batch.put_cf(&cf_gallery, keys::gallery_key(record.created_at, &record.id), []);
        }
        self.write(batch)?;
        Ok(record)
    }
}

#[async_trait]
impl LedgerStore for RocksStore {
    async fn open_account(&self, account_id: &AccountId, opening_credits: i64) -> Result<Account> {
        let _guard = self.lock()?;

        let key = keys::account_key(account_id);
        if self.get::<Account>(cf::ACCOUNTS, &key)?.is_some() {
            return Err(StoreError::AccountExists {
                account_id: account_id.to_string(),
            });
        }

        let mut account = Account::new(*account_id);
        let mut batch = WriteBatch::default();
        if opening_credits > 0 {
            let entry = LedgerEntry::new(
                *account_id,
                opening_credits,
                TransactionKind::Deposit,
                OPENING_GRANT_DESCRIPTION,
            );
            let tx = ledger::apply_credit(&mut account, entry)?;
            self.put_account_with_transaction(&mut batch, &account, &tx)?;
        } else {
            let cf_accounts = self.cf(cf::ACCOUNTS)?;
            batch.put_cf(&cf_accounts, key, Self::serialize(&account)?);
        }
        self.write(batch)?;

        tracing::debug!(account_id = %account_id, balance = account.balance, "Opened account");
        Ok(account)
    }

    async fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        self.get(cf::ACCOUNTS, &keys::account_key(account_id))
    }

    async fn debit(&self, entry: LedgerEntry) -> Result<Transaction> {
        let account_id = entry.account_id;
        self.mutate_account(&account_id, |account| ledger::apply_debit(account, entry))
    }

    async fn credit(&self, entry: LedgerEntry) -> Result<Transaction> {
        let account_id = entry.account_id;
        self.mutate_account(&account_id, |account| ledger::apply_credit(account, entry))
    }

    async fn check_in(
        &self,
        account_id: &AccountId,
        reward: i64,
        now: DateTime<Utc>,
    ) -> Result<Transaction> {
        self.mutate_account(account_id, |account| {
            ledger::apply_check_in(account, reward, now)
        })
    }

    async fn list_transactions(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Transaction>> {
        let index = self.prefix_keys(cf::TRANSACTIONS_BY_ACCOUNT, &keys::account_prefix(account_id))?;

        // Index keys sort oldest first.
        let mut transactions = Vec::new();
        for key in index.iter().rev().skip(offset).take(limit) {
            let Some(tx_id) = keys::transaction_id_from_account_key(key) else {
                continue;
            };
            if let Some(tx) = self.get(cf::TRANSACTIONS, &keys::transaction_key(&tx_id))? {
                transactions.push(tx);
            }
        }
        Ok(transactions)
    }
}

#[async_trait]
impl GenerationStore for RocksStore {
    async fn create_generation(&self, request: NewGeneration) -> Result<GenerationRecord> {
        let record = GenerationRecord::processing(
            request.account_id,
            request.prompt,
            request.negative_prompt,
            request.model,
            request.cost,
        );

        let cf_generations = self.cf(cf::GENERATIONS)?;
        let cf_by_account = self.cf(cf::GENERATIONS_BY_ACCOUNT)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(
            &cf_generations,
            keys::generation_key(&record.id),
            Self::serialize(&record)?,
        );
        batch.put_cf(
            &cf_by_account,
            keys::account_generation_key(&record.account_id, record.created_at, &record.id),
            [],
        );
        self.write(batch)?;
        Ok(record)
    }

    async fn get_generation(&self, generation_id: &GenerationId) -> Result<Option<GenerationRecord>> {
        self.get(cf::GENERATIONS, &keys::generation_key(generation_id))
    }

    async fn complete_generation(
        &self,
        generation_id: &GenerationId,
        image_ref: &str,
    ) -> Result<GenerationRecord> {
        self.settle(generation_id, Settlement::Completed { image_ref })
    }

    async fn fail_generation(
        &self,
        generation_id: &GenerationId,
        reason: &str,
    ) -> Result<GenerationRecord> {
        self.settle(generation_id, Settlement::Failed { reason })
    }

    async fn list_generations(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<GenerationRecord>> {
        let index = self.prefix_keys(cf::GENERATIONS_BY_ACCOUNT, &keys::account_prefix(account_id))?;

        let mut records = Vec::new();
        for key in index.iter().rev().skip(offset).take(limit) {
            let Some(generation_id) = keys::generation_id_from_account_key(key) else {
                continue;
            };
            if let Some(record) = self.get(cf::GENERATIONS, &keys::generation_key(&generation_id))? {
                records.push(record);
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl GalleryStore for RocksStore {
    async fn gallery(&self, limit: usize) -> Result<Vec<GalleryItem>> {
        let cf_gallery = self.cf(cf::GALLERY)?;

        let mut items = Vec::new();
        for item in self.db.iterator_cf(&cf_gallery, IteratorMode::End) {
            if items.len() >= limit {
                break;
            }
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            let Some(generation_id) = keys::generation_id_from_gallery_key(&key) else {
                continue;
            };
            if let Some(record) = self
                .get::<GenerationRecord>(cf::GENERATIONS, &keys::generation_key(&generation_id))?
            {
                items.push(GalleryItem {
                    likes: self.like_count(&record.id)?,
                    record,
                });
            }
        }
        Ok(items)
    }

    async fn toggle_like(
        &self,
        account_id: &AccountId,
        generation_id: &GenerationId,
    ) -> Result<LikeState> {
        let _guard = self.lock()?;

        let completed = self
            .get::<GenerationRecord>(cf::GENERATIONS, &keys::generation_key(generation_id))?
            .is_some_and(|record| record.status == GenerationStatus::Completed);
        if !completed {
            return Err(StoreError::generation_not_found(generation_id));
        }

        let cf_likes = self.cf(cf::LIKES)?;
        let key = keys::like_key(generation_id, account_id);
        let existing = self
            .db
            .get_cf(&cf_likes, &key)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let liked = if existing.is_some() {
            self.db
                .delete_cf(&cf_likes, &key)
                .map_err(|e| StoreError::Database(e.to_string()))?;
            false
        } else {
            self.db
                .put_cf(&cf_likes, &key, [])
                .map_err(|e| StoreError::Database(e.to_string()))?;
            true
        };

        Ok(LikeState {
            liked,
            count: self.like_count(generation_id)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (RocksStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        (store, dir)
    }

    fn new_generation(account_id: AccountId, prompt: &str) -> NewGeneration {
        NewGeneration {
            account_id,
            prompt: prompt.to_string(),
            negative_prompt: Some("blurry".into()),
            model: "nano-banana-fast".into(),
            cost: 5,
        }
    }

    #[tokio::test]
    async fn account_lifecycle() {
        let (store, _dir) = create_test_store();
        let account_id = AccountId::generate();

        store.open_account(&account_id, 10).await.unwrap();
        store
            .debit(LedgerEntry::new(account_id, 5, TransactionKind::Generate, "gen"))
            .await
            .unwrap();

        let account = store.get_account(&account_id).await.unwrap().unwrap();
        assert_eq!(account.balance, 5);

        let txs = store.list_transactions(&account_id, 10, 0).await.unwrap();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].kind, TransactionKind::Generate);
        assert_eq!(txs[1].kind, TransactionKind::Deposit);
        assert_eq!(txs.iter().map(|tx| tx.amount).sum::<i64>(), account.balance);

        let stored: Transaction = store
            .get(cf::TRANSACTIONS, &keys::transaction_key(&txs[0].id))
            .unwrap()
            .unwrap();
        assert_eq!(stored, txs[0]);
    }

    #[tokio::test]
    async fn overdraft_is_rejected() {
        let (store, _dir) = create_test_store();
        let account_id = AccountId::generate();
        store.open_account(&account_id, 3).await.unwrap();

        let result = store
            .debit(LedgerEntry::new(account_id, 5, TransactionKind::Generate, "gen"))
            .await;

        assert!(matches!(result, Err(StoreError::InsufficientBalance { .. })));
        let account = store.get_account(&account_id).await.unwrap().unwrap();
        assert_eq!(account.balance, 3);
        assert_eq!(store.list_transactions(&account_id, 10, 0).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_debits_never_overdraw() {
        let (store, _dir) = create_test_store();
        let store = Arc::new(store);
        let account_id = AccountId::generate();
        store.open_account(&account_id, 10).await.unwrap();

        let attempts = (0..6).map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .debit(LedgerEntry::new(account_id, 5, TransactionKind::Generate, "gen"))
                    .await
            })
        });
        let succeeded = futures::future::join_all(attempts)
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(Ok(_))))
            .count();

        assert_eq!(succeeded, 2);
        let account = store.get_account(&account_id).await.unwrap().unwrap();
        assert_eq!(account.balance, 0);
    }

    #[tokio::test]
    async fn check_in_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let account_id = AccountId::generate();
        let now = Utc::now();
        {
            let store = RocksStore::open(dir.path()).unwrap();
            store.open_account(&account_id, 0).await.unwrap();
            store.check_in(&account_id, 10, now).await.unwrap();
        }

        let store = RocksStore::open(dir.path()).unwrap();
        let again = store.check_in(&account_id, 10, now).await;
        assert!(matches!(again, Err(StoreError::AlreadyCheckedIn)));
        let account = store.get_account(&account_id).await.unwrap().unwrap();
        assert_eq!(account.balance, 10);
    }

    #[tokio::test]
    async fn generation_settles_once_and_reaches_gallery() {
        let (store, _dir) = create_test_store();
        let account_id = AccountId::generate();

        let record = store
            .create_generation(new_generation(account_id, "cat"))
            .await
            .unwrap();
        let done = store
            .complete_generation(&record.id, "https://cdn.example/cat.png")
            .await
            .unwrap();
        assert_eq!(done.status, GenerationStatus::Completed);
        assert!(done.completed_at.is_some());

        let again = store.fail_generation(&record.id, "late").await;
        assert!(matches!(again, Err(StoreError::InvalidTransition { .. })));

        let failed = store
            .create_generation(new_generation(account_id, "dog"))
            .await
            .unwrap();
        store.fail_generation(&failed.id, "NSFW").await.unwrap();

        let feed = store.gallery(50).await.unwrap();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].record.id, record.id);

        let listed = store.list_generations(&account_id, 10, 0).await.unwrap();
        assert_eq!(listed.len(), 2);
    }

    #[tokio::test]
    async fn likes_toggle() {
        let (store, _dir) = create_test_store();
        let author = AccountId::generate();
        let fan = AccountId::generate();
        let record = store
            .create_generation(new_generation(author, "cat"))
            .await
            .unwrap();

        let early = store.toggle_like(&fan, &record.id).await;
        assert!(matches!(early, Err(StoreError::NotFound { .. })));

        store.complete_generation(&record.id, "img").await.unwrap();
        assert_eq!(
            store.toggle_like(&fan, &record.id).await.unwrap(),
            LikeState { liked: true, count: 1 }
        );
        assert_eq!(
            store.toggle_like(&author, &record.id).await.unwrap(),
            LikeState { liked: true, count: 2 }
        );
        assert_eq!(
            store.toggle_like(&fan, &record.id).await.unwrap(),
            LikeState { liked: false, count: 1 }
        );
    }
}
