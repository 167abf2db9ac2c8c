//! Account management handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use atelier_core::Account;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Account response.
#[derive(Debug, Serialize)]
pub struct AccountResponse {
    /// Account ID.
    pub account_id: String,
    /// Current balance in credits.
    pub balance: i64,
    /// Last daily check-in.
    pub last_check_in: Option<String>,
    /// Created timestamp.
    pub created_at: String,
}

impl From<&Account> for AccountResponse {
    fn from(account: &Account) -> Self {
        Self {
            account_id: account.id.to_string(),
            balance: account.balance,
            last_check_in: account.last_check_in.map(|at| at.to_rfc3339()),
            created_at: account.created_at.to_rfc3339(),
        }
    }
}

/// Open an account for the authenticated user with the signup grant.
pub async fn create_account(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<(StatusCode, Json<AccountResponse>), ApiError> {
    let account = state
        .ledger
        .open_account(&auth.account_id, state.config.pricing.signup_credits)
        .await?;

    tracing::info!(
        account_id = %account.id,
        balance = account.balance,
        "Account created"
    );

    Ok((StatusCode::CREATED, Json(AccountResponse::from(&account))))
}

/// Get the authenticated user's account.
pub async fn get_account(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<AccountResponse>, ApiError> {
    let account = state
        .ledger
        .get_account(&auth.account_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Account not found".into()))?;

    Ok(Json(AccountResponse::from(&account)))
}
