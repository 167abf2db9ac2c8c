//! Authentication extractor.
//!
//! End users authenticate with an HS256 session JWT issued by the auth
//! collaborator. The `sub` claim carries the account UUID.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use atelier_core::AccountId;

use crate::error::ApiError;
use crate::state::AppState;

/// An authenticated user extracted from a session JWT.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The account the token was issued for.
    pub account_id: AccountId,
}

/// Session token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject (account UUID).
    pub sub: String,
    /// Expiration time (seconds since the epoch).
    pub exp: u64,
    /// Audience.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

/// Verifies session tokens against a shared secret.
#[derive(Clone)]
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("audience", &self.validation.aud)
            .finish_non_exhaustive()
    }
}

impl JwtVerifier {
    /// Create a verifier for `secret`, checking `audience` when given.
    #[must_use]
    pub fn new(secret: &str, audience: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        match audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Verify `token` and return the account it names.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Unauthorized` if the signature, expiry or audience
    /// check fails or the subject is not an account UUID.
    pub fn verify(&self, token: &str) -> Result<AccountId, ApiError> {
        let data = jsonwebtoken::decode::<SessionClaims>(token, &self.key, &self.validation)
            .map_err(|e| {
                tracing::debug!(error = %e, "Rejected session token");
                ApiError::Unauthorized
            })?;

        data.claims
            .sub
            .parse::<AccountId>()
            .map_err(|_| ApiError::Unauthorized)
    }
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        // Extract the Authorization header
        let auth_header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;

        // Extract the Bearer token
        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(ApiError::Unauthorized)?;

        let verifier = state.jwt.as_ref().ok_or(ApiError::Unauthorized)?;
        let account_id = verifier.verify(token.trim())?;

        Ok(AuthUser { account_id })
    }
}
