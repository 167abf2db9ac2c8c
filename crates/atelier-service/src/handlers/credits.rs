//! Credit balance, transaction and purchase handlers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use atelier_core::{DepositPlan, Transaction, TransactionKind};
use atelier_store::LedgerEntry;

use super::{default_limit, MAX_PAGE_SIZE};
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Balance response.
#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    /// Balance in credits.
    pub balance: i64,
}

/// Get current credit balance.
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<BalanceResponse>, ApiError> {
    let account = state
        .ledger
        .get_account(&auth.account_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Account not found".into()))?;

    Ok(Json(BalanceResponse {
        balance: account.balance,
    }))
}

/// Transaction list query parameters.
#[derive(Debug, Deserialize)]
pub struct ListTransactionsQuery {
    /// Maximum number of transactions to return (default: 50).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination (default: 0).
    #[serde(default)]
    pub offset: usize,
}

/// Transaction response.
#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    /// Transaction ID.
    pub id: String,
    /// Amount in credits (positive = credit, negative = debit).
    pub amount: i64,
    /// Transaction kind.
    pub kind: TransactionKind,
    /// Balance after this transaction.
    pub balance_after: i64,
    /// Description.
    pub description: String,
    /// Linked generation, for GENERATE and REFUND rows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_id: Option<String>,
    /// Timestamp.
    pub created_at: String,
}

impl From<&Transaction> for TransactionResponse {
    fn from(tx: &Transaction) -> Self {
        Self {
            id: tx.id.to_string(),
            amount: tx.amount,
            kind: tx.kind,
            balance_after: tx.balance_after,
            description: tx.description.clone(),
            generation_id: tx.generation_id.map(|id| id.to_string()),
            created_at: tx.created_at.to_rfc3339(),
        }
    }
}

/// List transactions response.
#[derive(Debug, Serialize)]
pub struct ListTransactionsResponse {
    /// Transactions (newest first).
    pub transactions: Vec<TransactionResponse>,
    /// Whether there are more transactions.
    pub has_more: bool,
}

/// List transaction history.
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<ListTransactionsQuery>,
) -> Result<Json<ListTransactionsResponse>, ApiError> {
    // Verify account exists
    state
        .ledger
        .get_account(&auth.account_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Account not found".into()))?;

    // Fetch one more than requested to determine has_more
    let limit = query.limit.min(MAX_PAGE_SIZE);
    let transactions = state
        .ledger
        .list_transactions(&auth.account_id, limit + 1, query.offset)
        .await?;

    let has_more = transactions.len() > limit;
    let transactions: Vec<_> = transactions
        .iter()
        .take(limit)
        .map(TransactionResponse::from)
        .collect();

    Ok(Json(ListTransactionsResponse {
        transactions,
        has_more,
    }))
}

/// Purchase credits request.
#[derive(Debug, Deserialize)]
pub struct PurchaseCreditsRequest {
    /// Plan identifier (`starter`, `standard` or `premium`).
    pub plan_id: String,
}

/// Purchase credits response.
#[derive(Debug, Serialize)]
pub struct PurchaseCreditsResponse {
    /// Purchased plan.
    pub plan_id: String,
    /// Credits deposited.
    pub credits: i64,
    /// Plan price in fen.
    pub price_fen: i64,
    /// Balance after the deposit.
    pub balance: i64,
    /// Deposit transaction ID.
    pub transaction_id: String,
}

/// Deposit the credits of a fixed plan.
pub async fn purchase_credits(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(request): Json<PurchaseCreditsRequest>,
) -> Result<Json<PurchaseCreditsResponse>, ApiError> {
    let plan = DepositPlan::from_id(&request.plan_id)
        .ok_or_else(|| ApiError::BadRequest(format!("Unknown plan: {}", request.plan_id)))?;

    let tx = state
        .ledger
        .credit(LedgerEntry::new(
            auth.account_id,
            plan.credits(),
            TransactionKind::Deposit,
            plan.description(),
        ))
        .await?;

    tracing::info!(
        account_id = %auth.account_id,
        plan = plan.id(),
        credits = plan.credits(),
        balance_after = tx.balance_after,
        "Credits purchased"
    );

    Ok(Json(PurchaseCreditsResponse {
        plan_id: plan.id().to_string(),
        credits: plan.credits(),
        price_fen: plan.price_fen(),
        balance: tx.balance_after,
        transaction_id: tx.id.to_string(),
    }))
}
