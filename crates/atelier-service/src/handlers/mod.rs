//! API handlers.

pub mod accounts;
pub mod checkin;
pub mod credits;
pub mod gallery;
pub mod generations;
pub mod health;

/// Largest page any list endpoint returns.
pub(crate) const MAX_PAGE_SIZE: usize = 100;

pub(crate) fn default_limit() -> usize {
    50
}
