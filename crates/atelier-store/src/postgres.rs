//! PostgreSQL storage implementation.
//!
//! Every balance change is a single guarded `UPDATE ... RETURNING balance`
//! followed by the transaction-row `INSERT`, both inside one SQL transaction.
//! The guard (`balance >= $amount`, or the check-in day test) is evaluated
//! under the row lock, so concurrent requests re-check against the committed
//! balance instead of a value read earlier.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row};
use uuid::Uuid;

use atelier_core::{
    Account, AccountId, GenerationId, GenerationRecord, GenerationStatus, Transaction,
    TransactionId, TransactionKind,
};

use crate::error::{Result, StoreError};
use crate::ledger::{LedgerEntry, DAILY_REWARD_DESCRIPTION, OPENING_GRANT_DESCRIPTION};
use crate::{GalleryItem, GalleryStore, GenerationStore, LedgerStore, LikeState, NewGeneration};

const ACCOUNT_COLUMNS: &str = "id, balance, last_check_in, created_at, updated_at";

const TRANSACTION_COLUMNS: &str =
    "id, account_id, amount, kind, balance_after, description, generation_id, created_at";

const GENERATION_COLUMNS: &str = "id, account_id, prompt, negative_prompt, model, status, \
     image_ref, cost, error_message, created_at, completed_at";

/// PostgreSQL-backed storage implementation.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wrap an existing connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the database at `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Apply pending schema migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn insert_transaction(
        conn: &mut sqlx::PgConnection,
        tx: &Transaction,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO transactions \
             (id, account_id, amount, kind, balance_after, description, generation_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(tx.id.to_string())
        .bind(*tx.account_id.as_uuid())
        .bind(tx.amount)
        .bind(tx.kind.as_str())
        .bind(tx.balance_after)
        .bind(&tx.description)
        .bind(tx.generation_id.map(|id| *id.as_uuid()))
        .bind(tx.created_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Explain why a guarded `UPDATE` on an account matched no row.
    async fn account_miss(
        conn: &mut sqlx::PgConnection,
        account_id: &AccountId,
        required: i64,
    ) -> StoreError {
        let balance = sqlx::query("SELECT balance FROM accounts WHERE id = $1")
            .bind(*account_id.as_uuid())
            .fetch_optional(conn)
            .await;

        match balance {
            Ok(Some(row)) => match row.try_get::<i64, _>("balance") {
                Ok(balance) => StoreError::InsufficientBalance { balance, required },
                Err(e) => e.into(),
            },
            Ok(None) => StoreError::account_not_found(account_id),
            Err(e) => e.into(),
        }
    }

    /// Apply a signed change to the balance, refusing any change that would
    /// make it negative, and append its transaction row.
    async fn apply(&self, entry: LedgerEntry, signed_amount: i64) -> Result<Transaction> {
        entry.validate()?;

        let mut db_tx = self.pool.begin().await?;
        let row = sqlx::query(
            "UPDATE accounts SET balance = balance + $2, updated_at = now() \
             WHERE id = $1 AND balance + $2 >= 0 \
             RETURNING balance",
        )
        .bind(*entry.account_id.as_uuid())
        .bind(signed_amount)
        .fetch_optional(&mut *db_tx)
        .await?;

        let Some(row) = row else {
            let err = Self::account_miss(&mut *db_tx, &entry.account_id, entry.amount).await;
            db_tx.rollback().await?;
            return Err(err);
        };

        let balance_after: i64 = row.try_get("balance")?;
        let tx = entry.into_transaction(signed_amount, balance_after);
        Self::insert_transaction(&mut *db_tx, &tx).await?;
        db_tx.commit().await?;
        Ok(tx)
    }

    async fn settle(
        &self,
        generation_id: &GenerationId,
        status: GenerationStatus,
        image_ref: Option<&str>,
        reason: Option<&str>,
    ) -> Result<GenerationRecord> {
        let row = sqlx::query(&format!(
            "UPDATE generations \
             SET status = $2, image_ref = $3, error_message = $4, completed_at = now() \
             WHERE id = $1 AND status IN ('PENDING', 'PROCESSING') \
             RETURNING {GENERATION_COLUMNS}"
        ))
        .bind(*generation_id.as_uuid())
        .bind(status.as_str())
        .bind(image_ref)
        .bind(reason)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return generation_from_row(&row);
        }

        match self.get_generation(generation_id).await? {
            Some(current) => Err(StoreError::InvalidTransition {
                id: *generation_id,
                status: current.status,
            }),
            None => Err(StoreError::generation_not_found(generation_id)),
        }
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn decode_error(what: &str, value: &str) -> StoreError {
    StoreError::Serialization(format!("invalid {what}: {value}"))
}

fn account_from_row(row: &PgRow) -> Result<Account> {
    Ok(Account {
        id: AccountId::from_uuid(row.try_get("id")?),
        balance: row.try_get("balance")?,
        last_check_in: row.try_get("last_check_in")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<Transaction> {
    let id: String = row.try_get("id")?;
    let kind: String = row.try_get("kind")?;
    let generation_id: Option<Uuid> = row.try_get("generation_id")?;

    Ok(Transaction {
        id: TransactionId::from_str(&id).map_err(|_| decode_error("transaction id", &id))?,
        account_id: AccountId::from_uuid(row.try_get("account_id")?),
        amount: row.try_get("amount")?,
        kind: TransactionKind::parse(&kind).ok_or_else(|| decode_error("transaction kind", &kind))?,
        balance_after: row.try_get("balance_after")?,
        description: row.try_get("description")?,
        generation_id: generation_id.map(GenerationId::from_uuid),
        created_at: row.try_get("created_at")?,
    })
}

fn generation_from_row(row: &PgRow) -> Result<GenerationRecord> {
    let status: String = row.try_get("status")?;

    Ok(GenerationRecord {
        id: GenerationId::from_uuid(row.try_get("id")?),
        account_id: AccountId::from_uuid(row.try_get("account_id")?),
        prompt: row.try_get("prompt")?,
        negative_prompt: row.try_get("negative_prompt")?,
        model: row.try_get("model")?,
        status: GenerationStatus::parse(&status)
            .ok_or_else(|| decode_error("generation status", &status))?,
        image_ref: row.try_get("image_ref")?,
        cost: row.try_get("cost")?,
        error_message: row.try_get("error_message")?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn sql_limit(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn like_count(row: &PgRow) -> Result<u64> {
    let count: i64 = row.try_get("likes")?;
    Ok(u64::try_from(count).unwrap_or(0))
}

// ============================================================================
// Trait implementations
// ============================================================================

#[async_trait]
impl LedgerStore for PgStore {
    async fn open_account(&self, account_id: &AccountId, opening_credits: i64) -> Result<Account> {
        let opening = opening_credits.max(0);

        let mut db_tx = self.pool.begin().await?;
        let row = sqlx::query(&format!(
            "INSERT INTO accounts (id, balance) VALUES ($1, $2) \
             ON CONFLICT (id) DO NOTHING \
             RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(*account_id.as_uuid())
        .bind(opening)
        .fetch_optional(&mut *db_tx)
        .await?;

        let Some(row) = row else {
            db_tx.rollback().await?;
            return Err(StoreError::AccountExists {
                account_id: account_id.to_string(),
            });
        };
        let account = account_from_row(&row)?;

        if opening > 0 {
            let tx = LedgerEntry::new(
                *account_id,
                opening,
                TransactionKind::Deposit,
                OPENING_GRANT_DESCRIPTION,
            )
            .into_transaction(opening, opening);
            Self::insert_transaction(&mut *db_tx, &tx).await?;
        }
        db_tx.commit().await?;

        tracing::debug!(account_id = %account_id, balance = account.balance, "Opened account");
        Ok(account)
    }

    async fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        sqlx::query(&format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"))
            .bind(*account_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(account_from_row)
            .transpose()
    }

    async fn debit(&self, entry: LedgerEntry) -> Result<Transaction> {
        let signed = -entry.amount;
        self.apply(entry, signed).await
    }

    async fn credit(&self, entry: LedgerEntry) -> Result<Transaction> {
        let signed = entry.amount;
        self.apply(entry, signed).await
    }

    async fn check_in(
        &self,
        account_id: &AccountId,
        reward: i64,
        now: DateTime<Utc>,
    ) -> Result<Transaction> {
        let entry = LedgerEntry::new(*account_id, reward, TransactionKind::Daily, DAILY_REWARD_DESCRIPTION);
        entry.validate()?;
        let day_start = now.date_naive().and_time(NaiveTime::MIN).and_utc();

        let mut db_tx = self.pool.begin().await?;
        let row = sqlx::query(
            "UPDATE accounts \
             SET balance = balance + $2, last_check_in = $3, updated_at = now() \
             WHERE id = $1 AND (last_check_in IS NULL OR last_check_in < $4) \
             RETURNING balance",
        )
        .bind(*account_id.as_uuid())
        .bind(reward)
        .bind(now)
        .bind(day_start)
        .fetch_optional(&mut *db_tx)
        .await?;

        let Some(row) = row else {
            let exists = sqlx::query("SELECT 1 FROM accounts WHERE id = $1")
                .bind(*account_id.as_uuid())
                .fetch_optional(&mut *db_tx)
                .await?
                .is_some();
            db_tx.rollback().await?;
            return Err(if exists {
                StoreError::AlreadyCheckedIn
            } else {
                StoreError::account_not_found(account_id)
            });
        };

        let balance_after: i64 = row.try_get("balance")?;
        let tx = entry.into_transaction(reward, balance_after);
        Self::insert_transaction(&mut *db_tx, &tx).await?;
        db_tx.commit().await?;
        Ok(tx)
    }

    async fn list_transactions(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE account_id = $1 ORDER BY id DESC LIMIT $2 OFFSET $3"
        ))
        .bind(*account_id.as_uuid())
        .bind(sql_limit(limit))
        .bind(sql_limit(offset))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(transaction_from_row).collect()
    }
}

#[async_trait]
impl GenerationStore for PgStore {
    async fn create_generation(&self, request: NewGeneration) -> Result<GenerationRecord> {
        let record = GenerationRecord::processing(
            request.account_id,
            request.prompt,
            request.negative_prompt,
            request.model,
            request.cost,
        );

        sqlx::query(
            "INSERT INTO generations \
             (id, account_id, prompt, negative_prompt, model, status, cost, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(*record.id.as_uuid())
        .bind(*record.account_id.as_uuid())
        .bind(&record.prompt)
        .bind(&record.negative_prompt)
        .bind(&record.model)
        .bind(record.status.as_str())
        .bind(record.cost)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(record)
    }

    async fn get_generation(&self, generation_id: &GenerationId) -> Result<Option<GenerationRecord>> {
        sqlx::query(&format!("SELECT {GENERATION_COLUMNS} FROM generations WHERE id = $1"))
            .bind(*generation_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(generation_from_row)
            .transpose()
    }

    async fn complete_generation(
        &self,
        generation_id: &GenerationId,
        image_ref: &str,
    ) -> Result<GenerationRecord> {
        self.settle(generation_id, GenerationStatus::Completed, Some(image_ref), None)
            .await
    }

    async fn fail_generation(
        &self,
        generation_id: &GenerationId,
        reason: &str,
    ) -> Result<GenerationRecord> {
        self.settle(generation_id, GenerationStatus::Failed, None, Some(reason))
            .await
    }

    async fn list_generations(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<GenerationRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {GENERATION_COLUMNS} FROM generations \
             WHERE account_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3"
        ))
        .bind(*account_id.as_uuid())
        .bind(sql_limit(limit))
        .bind(sql_limit(offset))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(generation_from_row).collect()
    }
}

#[async_trait]
impl GalleryStore for PgStore {
    async fn gallery(&self, limit: usize) -> Result<Vec<GalleryItem>> {
        let rows = sqlx::query(
            "SELECT g.id, g.account_id, g.prompt, g.negative_prompt, g.model, g.status, \
                    g.image_ref, g.cost, g.error_message, g.created_at, g.completed_at, \
                    COUNT(l.account_id) AS likes \
             FROM generations g \
             LEFT JOIN likes l ON l.generation_id = g.id \
             WHERE g.status = 'COMPLETED' \
             GROUP BY g.id \
             ORDER BY g.created_at DESC \
             LIMIT $1",
        )
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(GalleryItem {
                    record: generation_from_row(row)?,
                    likes: like_count(row)?,
                })
            })
            .collect()
    }

    async fn toggle_like(
        &self,
        account_id: &AccountId,
        generation_id: &GenerationId,
    ) -> Result<LikeState> {
        let mut db_tx: sqlx::Transaction<'_, Postgres> = self.pool.begin().await?;

        let completed = sqlx::query("SELECT 1 FROM generations WHERE id = $1 AND status = 'COMPLETED'")
            .bind(*generation_id.as_uuid())
            .fetch_optional(&mut *db_tx)
            .await?
            .is_some();
        if !completed {
            db_tx.rollback().await?;
            return Err(StoreError::generation_not_found(generation_id));
        }

        let removed = sqlx::query("DELETE FROM likes WHERE account_id = $1 AND generation_id = $2")
            .bind(*account_id.as_uuid())
            .bind(*generation_id.as_uuid())
            .execute(&mut *db_tx)
            .await?
            .rows_affected();

        let liked = if removed == 0 {
            sqlx::query(
                "INSERT INTO likes (account_id, generation_id) VALUES ($1, $2) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(*account_id.as_uuid())
            .bind(*generation_id.as_uuid())
            .execute(&mut *db_tx)
            .await?;
            true
        } else {
            false
        };

        let row = sqlx::query("SELECT COUNT(*) AS likes FROM likes WHERE generation_id = $1")
            .bind(*generation_id.as_uuid())
            .fetch_one(&mut *db_tx)
            .await?;
        let count = like_count(&row)?;
        db_tx.commit().await?;

        Ok(LikeState { liked, count })
    }
}
