//! In-memory storage implementation.
//!
//! All state sits behind one `RwLock`, so each trait call is a single atomic
//! unit: a balance never changes without its transaction row.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use atelier_core::{
    Account, AccountId, GenerationId, GenerationRecord, GenerationStatus, Transaction,
    TransactionKind,
};

use crate::error::{Result, StoreError};
use crate::ledger::{self, LedgerEntry, Settlement, OPENING_GRANT_DESCRIPTION};
use crate::{GalleryItem, GalleryStore, GenerationStore, LedgerStore, LikeState, NewGeneration};

#[derive(Debug, Default)]
struct State {
    accounts: HashMap<AccountId, Account>,
    /// Append-only, in commit order.
    transactions: Vec<Transaction>,
    generations: HashMap<GenerationId, GenerationRecord>,
    /// Generation IDs in creation order.
    generation_order: Vec<GenerationId>,
    likes: HashSet<(AccountId, GenerationId)>,
}

impl State {
    fn like_count(&self, generation_id: &GenerationId) -> u64 {
        self.likes
            .iter()
            .filter(|(_, liked)| liked == generation_id)
            .count() as u64
    }

    fn settle(
        &mut self,
        generation_id: &GenerationId,
        settlement: Settlement<'_>,
    ) -> Result<GenerationRecord> {
        let record = self
            .generations
            .get_mut(generation_id)
            .ok_or_else(|| StoreError::generation_not_found(generation_id))?;
        ledger::apply_settlement(record, settlement)?;
        Ok(record.clone())
    }
}

/// In-memory storage backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| StoreError::Database("memory store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| StoreError::Database("memory store lock poisoned".into()))
    }

    /// Apply `op` to a copy of the account and commit both the account and
    /// the resulting transaction only if `op` succeeds.
    fn mutate_account<F>(&self, account_id: &AccountId, op: F) -> Result<Transaction>
    where
        F: FnOnce(&mut Account) -> Result<Transaction>,
    {
        let mut state = self.write()?;
        let mut account = state
            .accounts
            .get(account_id)
            .cloned()
            .ok_or_else(|| StoreError::account_not_found(account_id))?;

        let tx = op(&mut account)?;

        state.accounts.insert(*account_id, account);
        state.transactions.push(tx.clone());
        Ok(tx)
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn open_account(&self, account_id: &AccountId, opening_credits: i64) -> Result<Account> {
        let mut state = self.write()?;
        if state.accounts.contains_key(account_id) {
            return Err(StoreError::AccountExists {
                account_id: account_id.to_string(),
            });
        }

        let mut account = Account::new(*account_id);
        if opening_credits > 0 {
            let entry = LedgerEntry::new(
                *account_id,
                opening_credits,
                TransactionKind::Deposit,
                OPENING_GRANT_DESCRIPTION,
            );
            let tx = ledger::apply_credit(&mut account, entry)?;
            state.transactions.push(tx);
        }

        state.accounts.insert(*account_id, account.clone());
        Ok(account)
    }

    async fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        Ok(self.read()?.accounts.get(account_id).cloned())
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
        let state = self.read()?;
        Ok(state
            .transactions
            .iter()
            .rev()
            .filter(|tx| tx.account_id == *account_id)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl GenerationStore for MemoryStore {
    async fn create_generation(&self, request: NewGeneration) -> Result<GenerationRecord> {
        let record = GenerationRecord::processing(
            request.account_id,
            request.prompt,
            request.negative_prompt,
            request.model,
            request.cost,
        );

        let mut state = self.write()?;
        state.generation_order.push(record.id);
        state.generations.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_generation(&self, generation_id: &GenerationId) -> Result<Option<GenerationRecord>> {
        Ok(self.read()?.generations.get(generation_id).cloned())
    }

    async fn complete_generation(
        &self,
        generation_id: &GenerationId,
        image_ref: &str,
    ) -> Result<GenerationRecord> {
        self.write()?
            .settle(generation_id, Settlement::Completed { image_ref })
    }

    async fn fail_generation(
        &self,
        generation_id: &GenerationId,
        reason: &str,
    ) -> Result<GenerationRecord> {
        self.write()?
            .settle(generation_id, Settlement::Failed { reason })
    }

    async fn list_generations(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<GenerationRecord>> {
        let state = self.read()?;
        Ok(state
            .generation_order
            .iter()
            .rev()
            .filter_map(|id| state.generations.get(id))
            .filter(|record| record.account_id == *account_id)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl GalleryStore for MemoryStore {
    async fn gallery(&self, limit: usize) -> Result<Vec<GalleryItem>> {
        let state = self.read()?;
        Ok(state
            .generation_order
            .iter()
            .rev()
            .filter_map(|id| state.generations.get(id))
            .filter(|record| record.status == GenerationStatus::Completed)
            .take(limit)
            .map(|record| GalleryItem {
                likes: state.like_count(&record.id),
                record: record.clone(),
            })
            .collect())
    }

    async fn toggle_like(
        &self,
        account_id: &AccountId,
        generation_id: &GenerationId,
    ) -> Result<LikeState> {
        let mut state = self.write()?;
        let completed = state
            .generations
            .get(generation_id)
            .is_some_and(|record| record.status == GenerationStatus::Completed);
        if !completed {
            return Err(StoreError::generation_not_found(generation_id));
        }

        let key = (*account_id, *generation_id);
        let liked = if state.likes.remove(&key) {
            false
        } else {
            state.likes.insert(key);
            true
        };

        Ok(LikeState {
            liked,
            count: state.like_count(generation_id),
        })
    }
}
