//! Common test utilities for atelier integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum_test::TestServer;
use jsonwebtoken::{EncodingKey, Header};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use atelier_core::{AccountId, PricingConfig};
use atelier_provider::{TaskProvider, TaskProviderConfig};
use atelier_service::auth::SessionClaims;
use atelier_service::{create_router, AppState, ProviderSettings, ServiceConfig};
use atelier_store::MemoryStore;

/// Secret the test server verifies session tokens with.
pub const JWT_SECRET: &str = "test-jwt-secret";

/// Path the mock provider serves generated images from.
pub const IMAGE_PATH: &str = "/images/out.png";

/// Poll attempts before the mock provider times out.
pub const MAX_ATTEMPTS: u32 = 3;

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// The backing store, for checking ledger state directly.
    pub store: Arc<MemoryStore>,
    /// Mock image provider.
    pub provider: MockServer,
    /// A test account ID for authenticated requests.
    pub test_account_id: AccountId,
}

impl TestHarness {
    /// Create a new test harness with a fresh store and mock provider.
    pub async fn new() -> Self {
        let provider_server = MockServer::start().await;
        let store = Arc::new(MemoryStore::new());

        let config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            data_dir: String::new(),
            database_url: None,
            auth_jwt_secret: Some(JWT_SECRET.into()),
            auth_audience: None,
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
            provider: ProviderSettings {
                base_url: provider_server.uri(),
                api_key: "test-provider-key".into(),
                poll_interval: Duration::ZERO,
                max_attempts: MAX_ATTEMPTS,
                ..ProviderSettings::default()
            },
            pricing: PricingConfig::default(),
        };

        let provider = TaskProvider::new(
            TaskProviderConfig::new(provider_server.uri(), "test-provider-key")
                .with_poll_interval(Duration::ZERO)
                .with_max_attempts(MAX_ATTEMPTS),
        )
        .expect("Failed to build provider");

        let state = AppState::new(store.clone(), Arc::new(provider), config);
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            store,
            provider: provider_server,
            test_account_id: AccountId::generate(),
        }
    }

    /// Get the authorization header for the test account.
    pub fn user_auth_header(&self) -> String {
        auth_header_for(&self.test_account_id)
    }

    /// Get a different user's auth header (for testing isolation).
    pub fn other_user_auth_header() -> String {
        auth_header_for(&AccountId::generate())
    }

    /// Open the test account with the signup grant.
    pub async fn create_account(&self) {
        self.server
            .post("/v1/accounts")
            .add_header("authorization", self.user_auth_header())
            .await
            .assert_status(axum::http::StatusCode::CREATED);
    }

    /// The provider accepts every task and finishes it on the first poll.
    pub async fn provider_succeeds(&self) {
        self.mount_task_created().await;
        self.mount_poll(json!({
            "status": "succeeded",
            "progress": 100,
            "results": [{ "url": format!("{}{IMAGE_PATH}", self.provider.uri()) }]
        }))
        .await;

        Mock::given(method("GET"))
            .and(path(IMAGE_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"fake-png-bytes".to_vec())
                    .insert_header("content-type", "image/png"),
            )
            .mount(&self.provider)
            .await;
    }

    /// The provider fails every task with `reason`.
    pub async fn provider_fails(&self, reason: &str) {
        self.mount_task_created().await;
        self.mount_poll(json!({
            "status": "failed",
            "failure_reason": reason
        }))
        .await;
    }

    /// The provider never finishes a task.
    pub async fn provider_hangs(&self) {
        self.mount_task_created().await;
        self.mount_poll(json!({ "status": "running", "progress": 10 }))
            .await;
    }

    async fn mount_task_created(&self) {
        Mock::given(method("POST"))
            .and(path("/v1/draw/nano-banana"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0,
                "msg": "success",
                "data": { "id": "task-1" }
            })))
            .mount(&self.provider)
            .await;
    }

    async fn mount_poll(&self, data: serde_json::Value) {
        Mock::given(method("POST"))
            .and(path("/v1/draw/result"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0,
                "msg": "success",
                "data": data
            })))
            .mount(&self.provider)
            .await;
    }
}

/// Mint a session token for `account_id`.
pub fn token_for(account_id: &AccountId, secret: &str) -> String {
    let exp = u64::try_from(chrono::Utc::now().timestamp()).expect("clock before epoch") + 3600;
    let claims = SessionClaims {
        sub: account_id.to_string(),
        exp,
        aud: None,
    };
    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("Failed to sign token")
}

/// Authorization header value for `account_id`.
pub fn auth_header_for(account_id: &AccountId) -> String {
    format!("Bearer {}", token_for(account_id, JWT_SECRET))
}
