//! Core types and utilities for atelier.
//!
//! This crate provides the foundational types shared by the store, provider
//! and service crates:
//!
//! - **Identifiers**: `AccountId`, `GenerationId`, `TransactionId`
//! - **Accounts**: `Account`
//! - **Credits**: `Transaction`, `TransactionKind`
//! - **Generations**: `GenerationRecord`, `GenerationStatus`
//! - **Pricing**: `PricingConfig`, `DepositPlan`
//!
//! # Credits
//!
//! Credits are whole units stored as `i64`. An account's balance is a cached
//! projection of its transaction log: the sum of every transaction amount for
//! the account always equals the balance.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod account;
pub mod credits;
pub mod generation;
pub mod ids;
pub mod pricing;

pub use account::Account;
pub use credits::{Transaction, TransactionKind};
pub use generation::{GenerationRecord, GenerationStatus};
pub use ids::{AccountId, GenerationId, IdError, TransactionId};
pub use pricing::{
    DepositPlan, PricingConfig, PricingError, DEFAULT_DAILY_REWARD, DEFAULT_GENERATION_COST,
    DEFAULT_SIGNUP_CREDITS,
};
