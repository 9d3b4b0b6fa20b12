//! Authenticated user accounts, as far as the relay needs to see them.
//!
//! Accounts are owned elsewhere; the relay reads the role and reads/writes
//! the embedded token-usage counters.

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    User,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }
}

impl std::str::FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown user role '{other}'")),
        }
    }
}

/// Daily and lifetime token counters embedded in a user record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub daily_tokens_used: u64,
    pub total_tokens_used: u64,
    pub last_reset_date: NaiveDate,
}

impl TokenUsage {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            daily_tokens_used: 0,
            total_tokens_used: 0,
            last_reset_date: today,
        }
    }

    /// The counters as they read on `today`: a stale day resets the daily
    /// figure to zero, the lifetime total is untouched.
    pub fn as_of(&self, today: NaiveDate) -> Self {
        if self.last_reset_date == today {
            *self
        } else {
            Self {
                daily_tokens_used: 0,
                total_tokens_used: self.total_tokens_used,
                last_reset_date: today,
            }
        }
    }

    /// Add `tokens` to both counters after applying the day rollover.
    pub fn add(&self, tokens: u64, today: NaiveDate) -> Self {
        let mut next = self.as_of(today);
        next.daily_tokens_used = next.daily_tokens_used.saturating_add(tokens);
        next.total_tokens_used = next.total_tokens_used.saturating_add(tokens);
        next
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAccount {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    pub role: UserRole,
    pub token_usage: TokenUsage,
}

impl UserAccount {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

/// Read/write access to user accounts and their token counters.
///
/// `record_token_usage` must be an atomic increment at the storage layer,
/// not a read-modify-write in application code.
#[async_trait]
pub trait UserStore: Send + Sync {
    fn name(&self) -> &str;

    async fn get_user(&self, user_id: &str) -> Result<Option<UserAccount>, StoreError>;

    /// Resolve a bearer token to its account.
    async fn find_by_token(&self, token: &str) -> Result<Option<UserAccount>, StoreError>;

    /// Zero the daily counter if `last_reset_date` is not `today`.
    /// Returns the counters after the (possible) reset.
    async fn reset_daily_usage_if_stale(
        &self,
        user_id: &str,
        today: NaiveDate,
    ) -> Result<TokenUsage, StoreError>;

    /// Atomically add `tokens` to the daily and total counters, resetting
    /// the daily counter first if the day has changed.
    async fn record_token_usage(
        &self,
        user_id: &str,
        tokens: u64,
        today: NaiveDate,
    ) -> Result<TokenUsage, StoreError>;
}
