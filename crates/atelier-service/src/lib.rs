//! Atelier HTTP API Service.
//!
//! This crate hosts the generation orchestrator and the HTTP API around it:
//!
//! - Accounts and credit balances
//! - Transaction history and plan purchases
//! - Daily check-in rewards
//! - Image generation (debit, provider call, settle or refund)
//! - The community gallery and likes
//!
//! # Authentication
//!
//! End-user requests carry an HS256 session JWT whose `sub` claim is the
//! account UUID. The gallery feed and health check are public.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Handlers must be async for axum

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod orchestrator;
pub mod routes;
pub mod state;

pub use config::{ProviderKind, ProviderSettings, ServiceConfig};
pub use error::ApiError;
pub use orchestrator::{GenerationError, GenerationOrchestrator, GenerationOutcome, GenerationStage};
pub use routes::create_router;
pub use state::{build_provider, AppState};
