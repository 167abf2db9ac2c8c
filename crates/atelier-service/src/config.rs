//! Service configuration.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use atelier_core::{
    PricingConfig, DEFAULT_DAILY_REWARD, DEFAULT_GENERATION_COST, DEFAULT_SIGNUP_CREDITS,
};

/// Which provider implementation a deployment uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Create-task / poll-result provider.
    Task,
    /// Single-call provider.
    Direct,
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "task" => Ok(Self::Task),
            "direct" => Ok(Self::Direct),
            other => Err(format!("unknown provider kind: {other}")),
        }
    }
}

/// Image provider settings.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// Implementation to use (default: task).
    pub kind: ProviderKind,

    /// Provider base URL.
    pub base_url: String,

    /// Provider API key.
    pub api_key: String,

    /// Model override; each provider has its own default.
    pub model: Option<String>,

    /// Wait before each poll (task provider only, default: 2s).
    pub poll_interval: Duration,

    /// Poll attempt budget (task provider only, default: 30).
    pub max_attempts: u32,

    /// Optional hard bound on one provider call, enforced by the orchestrator.
    pub deadline: Option<Duration>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Task,
            base_url: "https://api.grsai.com".into(),
            api_key: String::new(),
            model: None,
            poll_interval: Duration::from_secs(2),
            max_attempts: 30,
            deadline: None,
        }
    }
}

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Path to `RocksDB` data directory (default: "/data/atelier").
    pub data_dir: String,

    /// PostgreSQL URL. When set, PostgreSQL is the storage backend.
    pub database_url: Option<String>,

    /// HS256 secret for session tokens. Without it every authenticated
    /// request is rejected.
    pub auth_jwt_secret: Option<String>,

    /// Expected JWT audience, if any.
    pub auth_audience: Option<String>,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds. Must exceed the provider poll budget.
    pub request_timeout_seconds: u64,

    /// Image provider settings.
    pub provider: ProviderSettings,

    /// Pricing configuration.
    pub pricing: PricingConfig,
}

/// Provider secrets file structure.
#[derive(Debug, Deserialize)]
struct ProviderSecrets {
    base_url: String,
    api_key: String,
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let (base_url, api_key) = load_provider_secrets();

        let provider = ProviderSettings {
            kind: std::env::var("PROVIDER_KIND")
                .ok()
                .and_then(|s| match s.parse() {
                    Ok(kind) => Some(kind),
                    Err(e) => {
                        tracing::warn!(error = %e, "Ignoring PROVIDER_KIND");
                        None
                    }
                })
                .unwrap_or(defaults.provider.kind),
            base_url: base_url.unwrap_or(defaults.provider.base_url),
            api_key: api_key.unwrap_or_default(),
            model: env_non_empty("PROVIDER_MODEL"),
            poll_interval: env_parse("PROVIDER_POLL_INTERVAL_MS")
                .map_or(defaults.provider.poll_interval, Duration::from_millis),
            max_attempts: env_parse("PROVIDER_MAX_ATTEMPTS")
                .unwrap_or(defaults.provider.max_attempts),
            deadline: env_parse("PROVIDER_DEADLINE_SECONDS").map(Duration::from_secs),
        };

        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            data_dir: std::env::var("DATA_DIR").unwrap_or(defaults.data_dir),
            database_url: env_non_empty("DATABASE_URL"),
            auth_jwt_secret: env_non_empty("AUTH_JWT_SECRET"),
            auth_audience: env_non_empty("AUTH_AUDIENCE"),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: env_parse("MAX_BODY_BYTES").unwrap_or(defaults.max_body_bytes),
            request_timeout_seconds: env_parse("REQUEST_TIMEOUT_SECONDS")
                .unwrap_or(defaults.request_timeout_seconds),
            provider,
            pricing: PricingConfig {
                generation_cost: env_parse("GENERATION_COST").unwrap_or(DEFAULT_GENERATION_COST),
                daily_reward: env_parse("DAILY_REWARD").unwrap_or(DEFAULT_DAILY_REWARD),
                signup_credits: env_parse("SIGNUP_CREDITS").unwrap_or(DEFAULT_SIGNUP_CREDITS),
            },
        }
    }
}

/// Load provider secrets from file or environment.
///
/// Environment variables override the file per key.
fn load_provider_secrets() -> (Option<String>, Option<String>) {
    let secret_paths = [
        ".secrets/provider.json",
        "atelier/.secrets/provider.json",
        "../.secrets/provider.json",
    ];

    let from_file = secret_paths.iter().find_map(|path| {
        load_secrets_file::<ProviderSecrets>(path).ok().map(|secrets| {
            tracing::info!(path = %path, "Loaded provider secrets from file");
            secrets
        })
    });

    if from_file.is_none() {
        tracing::debug!("Provider secrets file not found, using environment variables");
    }

    let (file_url, file_key) = from_file.map_or((None, None), |s| (Some(s.base_url), Some(s.api_key)));
    (
        env_non_empty("PROVIDER_BASE_URL").or(file_url),
        env_non_empty("PROVIDER_API_KEY").or(file_key),
    )
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            data_dir: "/data/atelier".into(),
            database_url: None,
            auth_jwt_secret: None,
            auth_audience: None,
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 180,
            provider: ProviderSettings::default(),
            pricing: PricingConfig::default(),
        }
    }
}
