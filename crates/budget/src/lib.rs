//! Daily token budget enforcement for authenticated users.
//!
//! Checks a user's daily token counter against their role's ceiling before
//! a request reaches the model, and records usage after a successful reply.
//! Admins bypass both.

pub mod guard;
pub mod model;

pub use guard::TokenBudgetGuard;
pub use model::{BudgetLimits, DEFAULT_USER_DAILY_TOKENS, LimitExceeded, UsageReport};

use trailverse_core::error::StoreError;

/// Errors from the budget subsystem.
#[derive(Debug, thiserror::Error)]
pub enum BudgetError {
    #[error("daily token limit exceeded: {0}")]
    LimitExceeded(LimitExceeded),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
