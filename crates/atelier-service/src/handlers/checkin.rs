//! Daily check-in handlers.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Check-in status response.
#[derive(Debug, Serialize)]
pub struct CheckInStatusResponse {
    /// Whether today's reward was already claimed (UTC day).
    pub checked_in_today: bool,
    /// Current balance.
    pub balance: i64,
    /// Last check-in timestamp.
    pub last_check_in: Option<String>,
    /// Credits granted per check-in.
    pub daily_reward: i64,
}

/// Get today's check-in status.
pub async fn get_status(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<CheckInStatusResponse>, ApiError> {
    let account = state
        .ledger
        .get_account(&auth.account_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Account not found".into()))?;

    Ok(Json(CheckInStatusResponse {
        checked_in_today: account.checked_in_on(Utc::now()),
        balance: account.balance,
        last_check_in: account.last_check_in.map(|at| at.to_rfc3339()),
        daily_reward: state.config.pricing.daily_reward,
    }))
}

/// Check-in response.
#[derive(Debug, Serialize)]
pub struct CheckInResponse {
    /// Credits granted.
    pub reward: i64,
    /// Balance after the reward.
    pub balance: i64,
}

/// Claim the daily reward.
pub async fn check_in(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<CheckInResponse>, ApiError> {
    let reward = state.config.pricing.daily_reward;
    let tx = state
        .ledger
        .check_in(&auth.account_id, reward, Utc::now())
        .await?;

    tracing::info!(
        account_id = %auth.account_id,
        reward,
        balance_after = tx.balance_after,
        "Daily check-in"
    );

    Ok(Json(CheckInResponse {
        reward,
        balance: tx.balance_after,
    }))
}
