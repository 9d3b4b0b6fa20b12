//! Budget limits and the shapes reported to callers.

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::Serialize;
use std::fmt;
use trailverse_core::account::{TokenUsage, UserAccount, UserRole};

/// Daily ceiling for the `user` role when nothing else is configured.
pub const DEFAULT_USER_DAILY_TOKENS: u64 = 5000;

/// Per-role daily token ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetLimits {
    pub user_daily_tokens: u64,
}

impl BudgetLimits {
    pub fn from_config(config: &trailverse_config::BudgetConfig) -> Self {
        Self {
            user_daily_tokens: config.user_daily_tokens,
        }
    }

    /// `None` means unlimited.
    pub fn daily_limit_for(&self, role: UserRole) -> Option<u64> {
        match role {
            UserRole::Admin => None,
            UserRole::User => Some(self.user_daily_tokens),
        }
    }
}

impl Default for BudgetLimits {
    fn default() -> Self {
        Self {
            user_daily_tokens: DEFAULT_USER_DAILY_TOKENS,
        }
    }
}

/// Details returned with a 429 when the daily ceiling is reached.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitExceeded {
    pub daily_limit: u64,
    pub tokens_used: u64,
    pub remaining_tokens: u64,
    /// Next UTC midnight
    pub reset_time: DateTime<Utc>,
}

impl fmt::Display for LimitExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} tokens used, resets at {}",
            self.tokens_used,
            self.daily_limit,
            self.reset_time.to_rfc3339()
        )
    }
}

/// A user's current standing against their budget.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReport {
    pub user_id: String,
    pub role: UserRole,
    pub daily_tokens_used: u64,
    pub total_tokens_used: u64,
    pub daily_limit: Option<u64>,
    pub remaining_tokens: Option<u64>,
    pub last_reset_date: NaiveDate,
    pub reset_time: DateTime<Utc>,
}

impl UsageReport {
    pub fn new(user: &UserAccount, usage: TokenUsage, limits: &BudgetLimits, today: NaiveDate) -> Self {
        let daily_limit = limits.daily_limit_for(user.role);
        Self {
            user_id: user.id.clone(),
            role: user.role,
            daily_tokens_used: usage.daily_tokens_used,
            total_tokens_used: usage.total_tokens_used,
            daily_limit,
            remaining_tokens: daily_limit.map(|l| l.saturating_sub(usage.daily_tokens_used)),
            last_reset_date: usage.last_reset_date,
            reset_time: next_reset(today),
        }
    }
}

/// Midnight UTC following `today`.
pub fn next_reset(today: NaiveDate) -> DateTime<Utc> {
    today
        .checked_add_days(Days::new(1))
        .unwrap_or(today)
        .and_hms_opt(0, 0, 0)
        .unwrap_or_default()
        .and_utc()
}
