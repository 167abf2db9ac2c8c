//! Liveness and deployment summary.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::config::ProviderKind;
use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `ok` while the process serves requests.
    pub status: &'static str,
    /// Service name.
    pub service: &'static str,
    /// Crate version.
    pub version: &'static str,
    /// Provider implementation and model serving generations.
    pub provider: ProviderSummary,
    /// Credits charged per generation.
    pub generation_cost: i64,
    /// Whether session tokens can be verified. Authenticated routes answer 401 otherwise.
    pub auth_enabled: bool,
}

/// The configured image provider.
#[derive(Debug, Serialize)]
pub struct ProviderSummary {
    /// `task` or `direct`.
    pub kind: ProviderKind,
    /// Model name recorded on generations.
    pub model: String,
}

/// `GET /health`. Never touches the stores, so it answers while a backend is degraded.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "atelier",
        version: env!("CARGO_PKG_VERSION"),
        provider: ProviderSummary {
            kind: state.config.provider.kind,
            model: state.orchestrator.model().to_string(),
        },
        generation_cost: state.orchestrator.pricing().generation_cost,
        auth_enabled: state.jwt.is_some(),
    })
}
