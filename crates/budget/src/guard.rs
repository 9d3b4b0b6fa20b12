//! Pre-request limit check and post-response usage recording.

use crate::BudgetError;
use crate::model::{BudgetLimits, LimitExceeded, UsageReport, next_reset};
use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use trailverse_core::account::{TokenUsage, UserAccount, UserStore};
use trailverse_core::error::StoreError;
use trailverse_core::provider::Usage;

pub struct TokenBudgetGuard {
    store: Arc<dyn UserStore>,
    limits: BudgetLimits,
}

impl TokenBudgetGuard {
    pub fn new(store: Arc<dyn UserStore>, limits: BudgetLimits) -> Self {
        Self { store, limits }
    }

    pub fn limits(&self) -> &BudgetLimits {
        &self.limits
    }

    /// Allow or reject a request before it reaches the model.
    ///
    /// Admins always pass. A store failure while reading the counters
    /// fails open: it is logged and the request is allowed.
    pub async fn assert_within_daily_limit(&self, user: &UserAccount) -> Result<(), BudgetError> {
        self.check_on(user, Utc::now().date_naive()).await
    }

    async fn check_on(&self, user: &UserAccount, today: NaiveDate) -> Result<(), BudgetError> {
        let Some(daily_limit) = self.limits.daily_limit_for(user.role) else {
            return Ok(());
        };

        let usage = match self.store.reset_daily_usage_if_stale(&user.id, today).await {
            Ok(usage) => usage,
            Err(e) => {
                warn!(user_id = %user.id, error = %e, "Token limit check failed, allowing request");
                return Ok(());
            }
        };

        if usage.daily_tokens_used >= daily_limit {
            debug!(
                user_id = %user.id,
                used = usage.daily_tokens_used,
                limit = daily_limit,
                "Daily token limit reached"
            );
            return Err(BudgetError::LimitExceeded(LimitExceeded {
                daily_limit,
                tokens_used: usage.daily_tokens_used,
                remaining_tokens: daily_limit.saturating_sub(usage.daily_tokens_used),
                reset_time: next_reset(today),
            }));
        }
        Ok(())
    }

    /// Add a reply's token usage to the user's counters.
    ///
    /// Returns `None` when nothing was recorded (admin or zero usage).
    pub async fn record(
        &self,
        user: &UserAccount,
        usage: Usage,
    ) -> Result<Option<TokenUsage>, BudgetError> {
        let tokens = usage.total();
        if user.is_admin() || tokens == 0 {
            return Ok(None);
        }
        let updated = self
            .store
            .record_token_usage(&user.id, tokens, Utc::now().date_naive())
            .await?;
        debug!(
            user_id = %user.id,
            tokens,
            daily = updated.daily_tokens_used,
            "Recorded token usage"
        );
        Ok(Some(updated))
    }

    /// Record usage in the background. Failures are logged, never surfaced.
    pub fn spawn_record(self: &Arc<Self>, user: &UserAccount, usage: Usage) -> JoinHandle<()> {
        let guard = Arc::clone(self);
        let user = user.clone();
        tokio::spawn(async move {
            if let Err(e) = guard.record(&user, usage).await {
                warn!(user_id = %user.id, error = %e, "Failed to record token usage");
            }
        })
    }

    /// Current counters and remaining allowance for `user_id`.
    pub async fn usage_report(&self, user_id: &str) -> Result<UsageReport, BudgetError> {
        let today = Utc::now().date_naive();
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("user '{user_id}'")))?;
        let usage = self.store.reset_daily_usage_if_stale(user_id, today).await?;
        Ok(UsageReport::new(&user, usage, &self.limits, today))
    }
}
