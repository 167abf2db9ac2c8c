//! Application state.

use std::sync::Arc;

use atelier_provider::{
    DirectProvider, DirectProviderConfig, ImageProvider, ProviderError, TaskProvider,
    TaskProviderConfig,
};
use atelier_store::{GalleryStore, GenerationStore, LedgerStore};

use crate::auth::JwtVerifier;
use crate::config::{ProviderKind, ProviderSettings, ServiceConfig};
use crate::orchestrator::GenerationOrchestrator;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Accounts and the transaction log.
    pub ledger: Arc<dyn LedgerStore>,

    /// Generation records.
    pub records: Arc<dyn GenerationStore>,

    /// Community gallery.
    pub gallery: Arc<dyn GalleryStore>,

    /// Generation orchestrator.
    pub orchestrator: GenerationOrchestrator,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Session token verifier (absent when no secret is configured).
    pub jwt: Option<JwtVerifier>,
}

impl AppState {
    /// Create a new application state over one store backend.
    #[must_use]
    pub fn new<S>(store: Arc<S>, provider: Arc<dyn ImageProvider>, config: ServiceConfig) -> Self
    where
        S: LedgerStore + GenerationStore + GalleryStore + 'static,
    {
        let ledger: Arc<dyn LedgerStore> = store.clone();
        let records: Arc<dyn GenerationStore> = store.clone();
        let gallery: Arc<dyn GalleryStore> = store;

        let orchestrator = GenerationOrchestrator::new(
            ledger.clone(),
            records.clone(),
            provider,
            config.pricing.clone(),
        )
        .with_provider_deadline(config.provider.deadline);

        let jwt = config
            .auth_jwt_secret
            .as_deref()
            .map(|secret| JwtVerifier::new(secret, config.auth_audience.as_deref()));

        if jwt.is_none() {
            tracing::warn!("AUTH_JWT_SECRET not configured - authenticated requests will be rejected");
        }

        Self {
            ledger,
            records,
            gallery,
            orchestrator,
            config,
            jwt,
        }
    }
}

/// Build the configured image provider.
///
/// # Errors
///
/// Returns `ProviderError::Configuration` if the settings are invalid.
pub fn build_provider(settings: &ProviderSettings) -> Result<Arc<dyn ImageProvider>, ProviderError> {
    if settings.api_key.is_empty() {
        tracing::warn!("Provider API key not configured - generations will be rejected upstream");
    }

    let provider: Arc<dyn ImageProvider> = match settings.kind {
        ProviderKind::Task => {
            let mut config = TaskProviderConfig::new(&settings.base_url, &settings.api_key)
                .with_poll_interval(settings.poll_interval)
                .with_max_attempts(settings.max_attempts);
            if let Some(model) = &settings.model {
                config = config.with_model(model);
            }
            tracing::info!(
                base_url = %config.base_url,
                model = %config.model,
                poll_budget_seconds = config.poll_budget().as_secs(),
                "Task provider enabled"
            );
            Arc::new(TaskProvider::new(config)?)
        }
        ProviderKind::Direct => {
            let mut config = DirectProviderConfig::new(&settings.base_url, &settings.api_key);
            if let Some(model) = &settings.model {
                config = config.with_model(model);
            }
            tracing::info!(
                base_url = %config.base_url,
                model = %config.model,
                "Direct provider enabled"
            );
            Arc::new(DirectProvider::new(config)?)
        }
    };

    Ok(provider)
}
