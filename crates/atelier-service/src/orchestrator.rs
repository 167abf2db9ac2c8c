//! Generation orchestrator.
//!
//! Drives one image generation end to end:
//!
//! 1. Validate the prompt and pre-check the balance (no side effects on failure)
//! 2. Create the generation record in `PROCESSING`
//! 3. Debit the cost through the guarded ledger debit
//! 4. Call the provider
//! 5. Settle: complete the record, or refund and fail it
//!
//! Steps 4 and 5 run on their own task. A caller that goes away (client
//! disconnect, request timeout) does not interrupt polling or settlement, so
//! a debit is always followed by exactly one settlement.
//!
//! # Persistence faults
//!
//! Store failures after the debit are not retried. They are logged on the
//! `atelier::reconciliation` target with everything needed to fix the ledger
//! by hand, and surfaced as [`GenerationError::Persistence`].

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;

use atelier_core::{AccountId, GenerationId, PricingConfig, TransactionKind};
use atelier_provider::{GeneratedImage, ImageProvider, ProviderError};
use atelier_store::{GenerationStore, LedgerEntry, LedgerStore, NewGeneration, StoreError};

/// Ledger description for a generation debit.
const GENERATE_DESCRIPTION: &str = "Image generation";

/// Ledger description for the compensating refund.
pub const REFUND_DESCRIPTION: &str = "Refund for failed generation";

/// Prompt characters copied into the debit description.
const DESCRIPTION_PROMPT_CHARS: usize = 50;

/// Reason stored on a record whose debit lost the balance race.
const ABANDONED_REASON: &str = "Insufficient balance";

/// Reason stored on a record whose account vanished before the debit.
const MISSING_ACCOUNT_REASON: &str = "Account not found";

/// Stages of one generation, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStage {
    /// Input validated, nothing written yet.
    Requested,
    /// Record created and cost debited.
    Debited,
    /// Provider call in flight.
    ProviderCalled,
    /// Record completed.
    SettledSuccess,
    /// Cost refunded and record failed.
    SettledFailure,
}

impl fmt::Display for GenerationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Requested => "requested",
            Self::Debited => "debited",
            Self::ProviderCalled => "provider_called",
            Self::SettledSuccess => "settled_success",
            Self::SettledFailure => "settled_failure",
        };
        f.write_str(name)
    }
}

/// Result of a settled generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    /// The provider produced an image and the record is `COMPLETED`.
    Completed {
        /// The generation record.
        generation_id: GenerationId,
        /// Data URI or URL of the image.
        image_ref: String,
    },
    /// The provider failed, the cost was refunded and the record is `FAILED`.
    Failed {
        /// The generation record.
        generation_id: GenerationId,
        /// Provider error message, shown to the user.
        error: String,
    },
}

impl GenerationOutcome {
    /// The generation record ID.
    #[must_use]
    pub const fn generation_id(&self) -> GenerationId {
        match self {
            Self::Completed { generation_id, .. } | Self::Failed { generation_id, .. } => {
                *generation_id
            }
        }
    }
}

/// Errors that prevent a generation from settling normally.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// Rejected before any state change.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The requesting account doesn't exist.
    #[error("account not found: {0}")]
    AccountNotFound(AccountId),

    /// The balance doesn't cover the cost. Nothing was charged.
    #[error("insufficient balance: balance={balance}, required={required}")]
    InsufficientBalance {
        /// Current balance.
        balance: i64,
        /// Generation cost.
        required: i64,
    },

    /// A store operation failed. May need manual reconciliation.
    #[error("persistence fault at {stage}: {source}")]
    Persistence {
        /// Stage at which the store failed.
        stage: GenerationStage,
        /// The store error.
        #[source]
        source: StoreError,
    },

    /// The settlement task died without reporting.
    #[error("settlement task aborted: {0}")]
    Aborted(String),
}

/// A debited generation waiting for the provider.
#[derive(Debug, Clone)]
struct PendingGeneration {
    generation_id: GenerationId,
    account_id: AccountId,
    cost: i64,
    prompt: String,
}

/// Coordinates the ledger, the record store and the image provider.
#[derive(Clone)]
pub struct GenerationOrchestrator {
    ledger: Arc<dyn LedgerStore>,
    records: Arc<dyn GenerationStore>,
    provider: Arc<dyn ImageProvider>,
    pricing: PricingConfig,
    provider_deadline: Option<Duration>,
}

impl fmt::Debug for GenerationOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationOrchestrator")
            .field("model", &self.provider.model())
            .field("pricing", &self.pricing)
            .field("provider_deadline", &self.provider_deadline)
            .finish_non_exhaustive()
    }
}

impl GenerationOrchestrator {
    /// Create an orchestrator.
    #[must_use]
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        records: Arc<dyn GenerationStore>,
        provider: Arc<dyn ImageProvider>,
        pricing: PricingConfig,
    ) -> Self {
        Self {
            ledger,
            records,
            provider,
            pricing,
            provider_deadline: None,
        }
    }

    /// Bound every provider call by `deadline`. Expiry is a timeout and refunds.
    #[must_use]
    pub fn with_provider_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.provider_deadline = deadline;
        self
    }

    /// The pricing in effect.
    #[must_use]
    pub fn pricing(&self) -> &PricingConfig {
        &self.pricing
    }

    /// Model name recorded on new generations.
    #[must_use]
    pub fn model(&self) -> &str {
        self.provider.model()
    }

    /// Generate an image for `account_id`, charging the generation cost.
    ///
    /// Returns [`GenerationOutcome::Failed`] when the provider fails; the
    /// cost has been refunded by then.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if the prompt is empty after trimming.
    /// - `AccountNotFound` if the account doesn't exist.
    /// - `InsufficientBalance` if the balance doesn't cover the cost.
    /// - `Persistence` if a store operation fails.
    /// - `Aborted` if the settlement task panicked.
    pub async fn submit(
        &self,
        account_id: AccountId,
        prompt: &str,
        negative_prompt: Option<&str>,
    ) -> Result<GenerationOutcome, GenerationError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(GenerationError::InvalidInput("Prompt is required".into()));
        }
        let negative_prompt = negative_prompt
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let cost = self.pricing.generation_cost;

        tracing::debug!(
            account_id = %account_id,
            cost,
            stage = %GenerationStage::Requested,
            "Generation requested"
        );

        let account = self
            .ledger
            .get_account(&account_id)
            .await
            .map_err(|source| GenerationError::Persistence {
                stage: GenerationStage::Requested,
                source,
            })?
            .ok_or(GenerationError::AccountNotFound(account_id))?;

        if !account.has_sufficient_balance(cost) {
            return Err(GenerationError::InsufficientBalance {
                balance: account.balance,
                required: cost,
            });
        }

        let record = self
            .records
            .create_generation(NewGeneration {
                account_id,
                prompt: prompt.to_string(),
                negative_prompt,
                model: self.provider.model().to_string(),
                cost,
            })
            .await
            .map_err(|source| GenerationError::Persistence {
                stage: GenerationStage::Requested,
                source,
            })?;
        let generation_id = record.id;

        let description = format!(
            "{GENERATE_DESCRIPTION}: {}",
            prompt.chars().take(DESCRIPTION_PROMPT_CHARS).collect::<String>()
        );
        let debit = LedgerEntry::new(account_id, cost, TransactionKind::Generate, description)
            .for_generation(generation_id);

        match self.ledger.debit(debit).await {
            Ok(tx) => {
                tracing::info!(
                    account_id = %account_id,
                    generation_id = %generation_id,
                    cost,
                    balance_after = tx.balance_after,
                    stage = %GenerationStage::Debited,
                    "Generation debited"
                );
            }
            Err(StoreError::InsufficientBalance { balance, required }) => {
                // Another request spent the balance between the pre-check and the debit.
                self.abandon(&generation_id, ABANDONED_REASON).await;
                return Err(GenerationError::InsufficientBalance { balance, required });
            }
            Err(StoreError::NotFound { .. }) => {
                self.abandon(&generation_id, MISSING_ACCOUNT_REASON).await;
                return Err(GenerationError::AccountNotFound(account_id));
            }
            Err(source) => {
                self.abandon(&generation_id, &source.to_string()).await;
                return Err(GenerationError::Persistence {
                    stage: GenerationStage::Requested,
                    source,
                });
            }
        }

        let pending = PendingGeneration {
            generation_id,
            account_id,
            cost,
            prompt: prompt.to_string(),
        };
        let this = self.clone();
        tokio::spawn(async move { this.call_and_settle(pending).await })
            .await
            .map_err(|e| {
                tracing::error!(
                    target: "atelier::reconciliation",
                    generation_id = %generation_id,
                    account_id = %account_id,
                    cost,
                    error = %e,
                    "Settlement task aborted after debit"
                );
                GenerationError::Aborted(e.to_string())
            })?
    }

    /// Fail a record whose debit never happened. No ledger rows are written.
    async fn abandon(&self, generation_id: &GenerationId, reason: &str) {
        if let Err(e) = self
            .records
            .fail_generation(generation_id, reason)
            .await
        {
            tracing::error!(
                generation_id = %generation_id,
                error = %e,
                "Failed to close abandoned generation record"
            );
        }
    }

    async fn call_and_settle(
        self,
        pending: PendingGeneration,
    ) -> Result<GenerationOutcome, GenerationError> {
        tracing::debug!(
            generation_id = %pending.generation_id,
            model = self.provider.model(),
            stage = %GenerationStage::ProviderCalled,
            "Calling image provider"
        );

        match self.call_provider(&pending.prompt).await {
            Ok(image) => self.settle_success(&pending, image).await,
            Err(err) => self.settle_failure(&pending, &err).await,
        }
    }

    /// Run the provider, turning panics and deadline expiry into errors.
    async fn call_provider(&self, prompt: &str) -> Result<GeneratedImage, ProviderError> {
        let call = AssertUnwindSafe(self.provider.generate(prompt)).catch_unwind();

        let result = match self.provider_deadline {
            Some(deadline) => tokio::time::timeout(deadline, call)
                .await
                .map_err(|_| ProviderError::DeadlineExceeded(deadline))?,
            None => call.await,
        };

        result.unwrap_or_else(|panic| {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "provider panicked".to_string());
            Err(ProviderError::Fault(message))
        })
    }

    async fn settle_success(
        &self,
        pending: &PendingGeneration,
        image: GeneratedImage,
    ) -> Result<GenerationOutcome, GenerationError> {
        if let Err(source) = self
            .records
            .complete_generation(&pending.generation_id, &image.image_ref)
            .await
        {
            tracing::error!(
                target: "atelier::reconciliation",
                generation_id = %pending.generation_id,
                account_id = %pending.account_id,
                cost = pending.cost,
                stage = %GenerationStage::SettledSuccess,
                error = %source,
                "Image generated but record could not be completed"
            );
            return Err(GenerationError::Persistence {
                stage: GenerationStage::SettledSuccess,
                source,
            });
        }

        tracing::info!(
            generation_id = %pending.generation_id,
            account_id = %pending.account_id,
            source = ?image.source,
            stage = %GenerationStage::SettledSuccess,
            "Generation completed"
        );

        Ok(GenerationOutcome::Completed {
            generation_id: pending.generation_id,
            image_ref: image.image_ref,
        })
    }

    async fn settle_failure(
        &self,
        pending: &PendingGeneration,
        err: &ProviderError,
    ) -> Result<GenerationOutcome, GenerationError> {
        let reason = err.to_string();
        if err.is_timeout() {
            tracing::warn!(
                generation_id = %pending.generation_id,
                error = %reason,
                "Generation timed out, refunding"
            );
        } else {
            tracing::info!(
                generation_id = %pending.generation_id,
                error = %reason,
                "Generation failed, refunding"
            );
        }

        let refund = LedgerEntry::new(
            pending.account_id,
            pending.cost,
            TransactionKind::Refund,
            REFUND_DESCRIPTION,
        )
        .for_generation(pending.generation_id);

        // The record stays PROCESSING when the refund fails so it can be found.
        if let Err(source) = self.ledger.credit(refund).await {
            tracing::error!(
                target: "atelier::reconciliation",
                generation_id = %pending.generation_id,
                account_id = %pending.account_id,
                cost = pending.cost,
                stage = %GenerationStage::SettledFailure,
                provider_error = %reason,
                error = %source,
                "Refund failed after provider failure"
            );
            return Err(GenerationError::Persistence {
                stage: GenerationStage::SettledFailure,
                source,
            });
        }

        if let Err(source) = self
            .records
            .fail_generation(&pending.generation_id, &reason)
            .await
        {
            tracing::error!(
                target: "atelier::reconciliation",
                generation_id = %pending.generation_id,
                account_id = %pending.account_id,
                cost = pending.cost,
                stage = %GenerationStage::SettledFailure,
                error = %source,
                "Refunded but record could not be failed"
            );
            return Err(GenerationError::Persistence {
                stage: GenerationStage::SettledFailure,
                source,
            });
        }

        tracing::info!(
            generation_id = %pending.generation_id,
            account_id = %pending.account_id,
            stage = %GenerationStage::SettledFailure,
            "Generation refunded"
        );

        Ok(GenerationOutcome::Failed {
            generation_id: pending.generation_id,
            error: reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use tokio::sync::Notify;

    use atelier_core::{Account, GenerationStatus, Transaction};
    use atelier_provider::{ImageSource, TaskProvider, TaskProviderConfig};
    use atelier_store::{MemoryStore, Result as StoreResult};

    const IMAGE: &str = "data:image/png;base64,aW1n";

    // ========================================================================
    // Test providers
    // ========================================================================

    enum Script {
        Succeed,
        Fail(&'static str),
        Panic,
        Hang,
    }

    struct ScriptedProvider(Script);

    #[async_trait]
    impl ImageProvider for ScriptedProvider {
        async fn generate(&self, _prompt: &str) -> Result<GeneratedImage, ProviderError> {
            match self.0 {
                Script::Succeed => Ok(GeneratedImage {
                    image_ref: IMAGE.to_string(),
                    source: ImageSource::Inline,
                }),
                Script::Fail(reason) => Err(ProviderError::Failed {
                    reason: reason.to_string(),
                }),
                Script::Panic => panic!("provider exploded"),
                Script::Hang => std::future::pending().await,
            }
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    /// Blocks inside `generate` until released.
    struct GatedProvider {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl ImageProvider for GatedProvider {
        async fn generate(&self, _prompt: &str) -> Result<GeneratedImage, ProviderError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(GeneratedImage {
                image_ref: IMAGE.to_string(),
                source: ImageSource::Inline,
            })
        }

        fn model(&self) -> &str {
            "gated"
        }
    }

    /// Which ledger write a [`FaultyLedger`] rejects.
    #[derive(Clone, Copy)]
    enum Fault {
        Debit,
        Credit,
    }

    /// Ledger that fails one kind of write with a database error.
    struct FaultyLedger(Arc<MemoryStore>, Fault);

    #[async_trait]
    impl LedgerStore for FaultyLedger {
        async fn open_account(&self, account_id: &AccountId, credits: i64) -> StoreResult<Account> {
            self.0.open_account(account_id, credits).await
        }

        async fn get_account(&self, account_id: &AccountId) -> StoreResult<Option<Account>> {
            self.0.get_account(account_id).await
        }

        async fn debit(&self, entry: LedgerEntry) -> StoreResult<Transaction> {
            match self.1 {
                Fault::Debit => Err(StoreError::Database("connection reset".into())),
                Fault::Credit => self.0.debit(entry).await,
            }
        }

        async fn credit(&self, entry: LedgerEntry) -> StoreResult<Transaction> {
            match self.1 {
                Fault::Credit => Err(StoreError::Database("connection reset".into())),
                Fault::Debit => self.0.credit(entry).await,
            }
        }

        async fn check_in(
            &self,
            account_id: &AccountId,
            reward: i64,
            now: DateTime<Utc>,
        ) -> StoreResult<Transaction> {
            self.0.check_in(account_id, reward, now).await
        }

        async fn list_transactions(
            &self,
            account_id: &AccountId,
            limit: usize,
            offset: usize,
        ) -> StoreResult<Vec<Transaction>> {
            self.0.list_transactions(account_id, limit, offset).await
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn orchestrator(store: &Arc<MemoryStore>, provider: Arc<dyn ImageProvider>) -> GenerationOrchestrator {
        GenerationOrchestrator::new(
            store.clone(),
            store.clone(),
            provider,
            PricingConfig::default(),
        )
    }

    async fn account_with(store: &MemoryStore, balance: i64) -> AccountId {
        let account_id = AccountId::generate();
        store.open_account(&account_id, balance).await.unwrap();
        account_id
    }

    async fn balance(store: &MemoryStore, account_id: &AccountId) -> i64 {
        store.get_account(account_id).await.unwrap().unwrap().balance
    }

    async fn kinds(store: &MemoryStore, account_id: &AccountId) -> Vec<TransactionKind> {
        let mut kinds: Vec<_> = store
            .list_transactions(account_id, 100, 0)
            .await
            .unwrap()
            .into_iter()
            .map(|tx| tx.kind)
            .collect();
        kinds.reverse();
        kinds
    }

    async fn assert_ledger_consistent(store: &MemoryStore, account_id: &AccountId) {
        let sum: i64 = store
            .list_transactions(account_id, 1000, 0)
            .await
            .unwrap()
            .iter()
            .map(|tx| tx.amount)
            .sum();
        assert_eq!(balance(store, account_id).await, sum);
    }

    // ========================================================================
    // Settlement
    // ========================================================================

    #[tokio::test]
    async fn success_debits_once_without_refund() {
        let store = Arc::new(MemoryStore::new());
        let account_id = account_with(&store, 10).await;
        let orchestrator = orchestrator(&store, Arc::new(ScriptedProvider(Script::Succeed)));

        let outcome = orchestrator.submit(account_id, "  cat  ", Some("  ")).await.unwrap();

        let GenerationOutcome::Completed {
            generation_id,
            image_ref,
        } = outcome
        else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(image_ref, IMAGE);
        assert_eq!(balance(&store, &account_id).await, 5);
        assert_eq!(
            kinds(&store, &account_id).await,
            vec![TransactionKind::Deposit, TransactionKind::Generate]
        );

        let record = store.get_generation(&generation_id).await.unwrap().unwrap();
        assert_eq!(record.status, GenerationStatus::Completed);
        assert_eq!(record.prompt, "cat");
        assert_eq!(record.negative_prompt, None);
        assert_eq!(record.model, "scripted");
        assert_eq!(record.cost, 5);
        assert_eq!(record.image_ref.as_deref(), Some(IMAGE));
        assert!(record.completed_at.is_some());

        let debit = &store.list_transactions(&account_id, 1, 0).await.unwrap()[0];
        assert_eq!(debit.amount, -5);
        assert_eq!(debit.generation_id, Some(generation_id));
        assert_ledger_consistent(&store, &account_id).await;
    }

    #[tokio::test]
    async fn provider_failure_refunds_and_keeps_reason() {
        let store = Arc::new(MemoryStore::new());
        let account_id = account_with(&store, 10).await;
        let orchestrator = orchestrator(&store, Arc::new(ScriptedProvider(Script::Fail("NSFW"))));

        let outcome = orchestrator.submit(account_id, "cat", None).await.unwrap();

        let GenerationOutcome::Failed {
            generation_id,
            error,
        } = outcome
        else {
            panic!("expected failure, got {outcome:?}");
        };
        assert_eq!(error, "NSFW");
        assert_eq!(balance(&store, &account_id).await, 10);
        assert_eq!(
            kinds(&store, &account_id).await,
            vec![
                TransactionKind::Deposit,
                TransactionKind::Generate,
                TransactionKind::Refund
            ]
        );

        let record = store.get_generation(&generation_id).await.unwrap().unwrap();
        assert_eq!(record.status, GenerationStatus::Failed);
        assert_eq!(record.error_message.as_deref(), Some("NSFW"));

        let refund = &store.list_transactions(&account_id, 1, 0).await.unwrap()[0];
        assert_eq!(refund.amount, 5);
        assert_eq!(refund.description, REFUND_DESCRIPTION);
        assert_eq!(refund.generation_id, Some(generation_id));
        assert_ledger_consistent(&store, &account_id).await;
    }

    #[tokio::test]
    async fn balance_one_short_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let account_id = account_with(&store, 4).await;
        let orchestrator = orchestrator(&store, Arc::new(ScriptedProvider(Script::Succeed)));

        let err = orchestrator.submit(account_id, "cat", None).await.unwrap_err();

        assert!(matches!(
            err,
            GenerationError::InsufficientBalance {
                balance: 4,
                required: 5
            }
        ));
        assert_eq!(kinds(&store, &account_id).await, vec![TransactionKind::Deposit]);
        assert!(store
            .list_generations(&account_id, 10, 0)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn empty_prompt_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let account_id = account_with(&store, 10).await;
        let orchestrator = orchestrator(&store, Arc::new(ScriptedProvider(Script::Succeed)));

        let err = orchestrator.submit(account_id, "   ", None).await.unwrap_err();

        assert!(matches!(err, GenerationError::InvalidInput(_)));
        assert_eq!(balance(&store, &account_id).await, 10);
        assert!(store
            .list_generations(&account_id, 10, 0)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn unknown_account_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let orchestrator = orchestrator(&store, Arc::new(ScriptedProvider(Script::Succeed)));

        let err = orchestrator
            .submit(AccountId::generate(), "cat", None)
            .await
            .unwrap_err();

        assert!(matches!(err, GenerationError::AccountNotFound(_)));
    }

    #[tokio::test]
    async fn negative_prompt_is_trimmed_and_kept() {
        let store = Arc::new(MemoryStore::new());
        let account_id = account_with(&store, 10).await;
        let orchestrator = orchestrator(&store, Arc::new(ScriptedProvider(Script::Succeed)));

        let outcome = orchestrator
            .submit(account_id, "cat", Some("  blurry "))
            .await
            .unwrap();

        let record = store
            .get_generation(&outcome.generation_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.negative_prompt.as_deref(), Some("blurry"));
    }

    #[tokio::test]
    async fn polling_timeout_refunds() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/draw/nano-banana"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 0,
                "data": { "id": "task-1" }
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/draw/result"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 0,
                "data": { "status": "running", "progress": 10 }
            })))
            .expect(3)
            .mount(&server)
            .await;

        let provider = TaskProvider::new(
            TaskProviderConfig::new(server.uri(), "test-key")
                .with_poll_interval(Duration::ZERO)
                .with_max_attempts(3),
        )
        .unwrap();

        let store = Arc::new(MemoryStore::new());
        let account_id = account_with(&store, 10).await;
        let orchestrator = orchestrator(&store, Arc::new(provider));

        let outcome = orchestrator.submit(account_id, "cat", None).await.unwrap();

        let GenerationOutcome::Failed {
            generation_id,
            error,
        } = outcome
        else {
            panic!("expected failure, got {outcome:?}");
        };
        assert!(error.contains("timed out"), "{error}");
        assert_eq!(balance(&store, &account_id).await, 10);

        let record = store.get_generation(&generation_id).await.unwrap().unwrap();
        assert_eq!(record.status, GenerationStatus::Failed);
        assert_ledger_consistent(&store, &account_id).await;
    }

    #[tokio::test]
    async fn provider_panic_refunds() {
        let store = Arc::new(MemoryStore::new());
        let account_id = account_with(&store, 10).await;
        let orchestrator = orchestrator(&store, Arc::new(ScriptedProvider(Script::Panic)));

        let outcome = orchestrator.submit(account_id, "cat", None).await.unwrap();

        let GenerationOutcome::Failed { error, .. } = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert!(error.contains("provider exploded"), "{error}");
        assert_eq!(balance(&store, &account_id).await, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expiry_refunds() {
        let store = Arc::new(MemoryStore::new());
        let account_id = account_with(&store, 10).await;
        let orchestrator = orchestrator(&store, Arc::new(ScriptedProvider(Script::Hang)))
            .with_provider_deadline(Some(Duration::from_secs(90)));

        let outcome = orchestrator.submit(account_id, "cat", None).await.unwrap();

        let GenerationOutcome::Failed {
            generation_id,
            error,
        } = outcome
        else {
            panic!("expected failure, got {outcome:?}");
        };
        assert_eq!(error, "generation timed out after 90s");
        assert_eq!(balance(&store, &account_id).await, 10);
        let record = store.get_generation(&generation_id).await.unwrap().unwrap();
        assert_eq!(record.status, GenerationStatus::Failed);
    }

    // ========================================================================
    // Concurrency and cancellation
    // ========================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_never_overdraw() {
        let store = Arc::new(MemoryStore::new());
        let account_id = account_with(&store, 10).await;
        let orchestrator = orchestrator(&store, Arc::new(ScriptedProvider(Script::Succeed)));

        let attempts = (0..6).map(|_| {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.submit(account_id, "cat", None).await })
        });
        let results = futures::future::join_all(attempts).await;

        let mut completed = 0;
        for result in results {
            match result.unwrap() {
                Ok(GenerationOutcome::Completed { .. }) => completed += 1,
                Err(GenerationError::InsufficientBalance { .. }) => {}
                other => panic!("unexpected result: {other:?}"),
            }
        }
        assert_eq!(completed, 2);
        assert_eq!(balance(&store, &account_id).await, 0);
        assert_ledger_consistent(&store, &account_id).await;

        let records = store.list_generations(&account_id, 100, 0).await.unwrap();
        assert!(records.iter().all(|r| r.status.is_terminal()));
        assert_eq!(
            records
                .iter()
                .filter(|r| r.status == GenerationStatus::Completed)
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn dropped_caller_still_settles() {
        let store = Arc::new(MemoryStore::new());
        let account_id = account_with(&store, 10).await;
        let provider = Arc::new(GatedProvider {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let orchestrator = orchestrator(&store, provider.clone());

        let caller = tokio::spawn(async move { orchestrator.submit(account_id, "cat", None).await });
        provider.entered.notified().await;
        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());

        provider.release.notify_one();

        let mut settled = None;
        for _ in 0..100 {
            let records = store.list_generations(&account_id, 1, 0).await.unwrap();
            if let Some(record) = records.into_iter().find(|r| r.status.is_terminal()) {
                settled = Some(record);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let record = settled.expect("generation never settled");
        assert_eq!(record.status, GenerationStatus::Completed);
        assert_eq!(balance(&store, &account_id).await, 5);
    }

    #[tokio::test]
    async fn failed_refund_leaves_record_processing() {
        let store = Arc::new(MemoryStore::new());
        let account_id = account_with(&store, 10).await;
        let orchestrator = GenerationOrchestrator::new(
            Arc::new(FaultyLedger(store.clone(), Fault::Credit)),
            store.clone(),
            Arc::new(ScriptedProvider(Script::Fail("NSFW"))),
            PricingConfig::default(),
        );

        let err = orchestrator.submit(account_id, "cat", None).await.unwrap_err();

        assert!(matches!(
            err,
            GenerationError::Persistence {
                stage: GenerationStage::SettledFailure,
                ..
            }
        ));
        assert_eq!(balance(&store, &account_id).await, 5);

        let records = store.list_generations(&account_id, 10, 0).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, GenerationStatus::Processing);
    }

    #[tokio::test]
    async fn failed_debit_records_the_fault() {
        let store = Arc::new(MemoryStore::new());
        let account_id = account_with(&store, 10).await;
        let orchestrator = GenerationOrchestrator::new(
            Arc::new(FaultyLedger(store.clone(), Fault::Debit)),
            store.clone(),
            Arc::new(ScriptedProvider(Script::Succeed)),
            PricingConfig::default(),
        );

        let err = orchestrator.submit(account_id, "cat", None).await.unwrap_err();

        assert!(matches!(
            err,
            GenerationError::Persistence {
                stage: GenerationStage::Requested,
                source: StoreError::Database(_),
            }
        ));
        assert_eq!(balance(&store, &account_id).await, 10);

        let records = store.list_generations(&account_id, 10, 0).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, GenerationStatus::Failed);
        let reason = records[0].error_message.as_deref().unwrap();
        assert_ne!(reason, "Insufficient balance");
        assert_eq!(reason, "database error: connection reset");
    }
}
