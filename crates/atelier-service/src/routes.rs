//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{accounts, checkin, credits, gallery, generations, health};
use crate::state::AppState;

// ============================================================================
// Concurrency Limiting Constants
// ============================================================================

/// Maximum concurrent generation requests.
/// Each one holds its connection open for the whole provider poll.
const GENERATION_MAX_CONCURRENT_REQUESTS: usize = 20;

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
/// - `GET /v1/gallery` - Completed generations with like counts
///
/// ## Accounts (session JWT auth)
/// - `POST /v1/accounts` - Open account with the signup grant
/// - `GET /v1/accounts/me` - Get current user's account
///
/// ## Credits (session JWT auth)
/// - `GET /v1/credits/balance` - Get current balance
/// - `GET /v1/credits/transactions` - List transaction history
/// - `POST /v1/credits/purchase` - Deposit a plan's credits
///
/// ## Check-in (session JWT auth)
/// - `GET /v1/checkin` - Today's check-in status
/// - `POST /v1/checkin` - Claim the daily reward
///
/// ## Generations (session JWT auth, rate-limited)
/// - `POST /v1/generations` - Generate an image
/// - `GET /v1/generations` - List own generations
/// - `GET /v1/generations/:id` - Get one own generation
///
/// ## Gallery (session JWT auth)
/// - `POST /v1/gallery/:id/like` - Toggle a like
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    // Build CORS layer
    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    // Generations keep a connection open until the provider settles, so they
    // get a tighter limit of their own.
    let generation_routes = Router::new()
        .route(
            "/",
            post(generations::create_generation).get(generations::list_generations),
        )
        .route("/:id", get(generations::get_generation))
        .layer(ConcurrencyLimitLayer::new(GENERATION_MAX_CONCURRENT_REQUESTS));

    // Create concurrency-limited API routes
    let api_routes = Router::new()
        // Accounts
        .route("/accounts", post(accounts::create_account))
        .route("/accounts/me", get(accounts::get_account))
        // Credits
        .route("/credits/balance", get(credits::get_balance))
        .route("/credits/transactions", get(credits::list_transactions))
        .route("/credits/purchase", post(credits::purchase_credits))
        // Check-in
        .route("/checkin", get(checkin::get_status).post(checkin::check_in))
        // Gallery
        .route("/gallery", get(gallery::list_gallery))
        .route("/gallery/:id/like", post(gallery::toggle_like))
        // Generations (with their own concurrency limit)
        .nest("/generations", generation_routes)
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS));

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        // API v1 routes (rate limited)
        .nest("/v1", api_routes)
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
