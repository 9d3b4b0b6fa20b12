//! Relay and pipeline errors, with the HTTP status each one surfaces as.

use trailverse_budget::{BudgetError, LimitExceeded};
use trailverse_core::error::{ProviderError, StoreError};
use trailverse_core::provider::ProviderKind;

/// Failures of a single relay call. Never swallowed; every variant reaches
/// the HTTP caller with its own status and machine-readable kind.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RelayError {
    #[error("Invalid provider '{0}'. Supported providers: claude, openai")]
    InvalidProvider(String),

    #[error("{} is not configured on this server", .0.display_name())]
    ProviderUnavailable(ProviderKind),

    #[error("All Claude models are unavailable: {last_error}")]
    AllModelsUnavailable {
        attempted: Vec<String>,
        last_error: String,
    },

    #[error("Upstream authentication failed: {0}")]
    AuthFailure(String),

    #[error("Upstream rate limit reached: {message}")]
    RateLimited {
        message: String,
        retry_after_secs: Option<u64>,
    },

    #[error("Upstream error: {0}")]
    Upstream(String),
}

impl RelayError {
    /// Classify a terminal provider failure.
    pub fn from_provider(error: ProviderError) -> Self {
        if error.is_auth_failure() {
            return Self::AuthFailure(error.to_string());
        }
        if error.is_rate_limited() {
            let retry_after_secs = match &error {
                ProviderError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
                _ => None,
            };
            return Self::RateLimited {
                message: error.to_string(),
                retry_after_secs,
            };
        }
        Self::Upstream(error.to_string())
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidProvider(_) | Self::AllModelsUnavailable { .. } => 400,
            Self::AuthFailure(_) => 401,
            Self::RateLimited { .. } => 429,
            Self::ProviderUnavailable(_) | Self::Upstream(_) => 500,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidProvider(_) => "invalid_provider",
            Self::ProviderUnavailable(_) => "provider_unavailable",
            Self::AllModelsUnavailable { .. } => "all_models_unavailable",
            Self::AuthFailure(_) => "auth_failure",
            Self::RateLimited { .. } => "rate_limited",
            Self::Upstream(_) => "upstream_error",
        }
    }

    /// Short error title for the response's `error` field.
    pub fn title(&self) -> &'static str {
        match self {
            Self::InvalidProvider(_) => "Invalid provider",
            Self::ProviderUnavailable(_) => "AI provider not available",
            Self::AllModelsUnavailable { .. } => "All Claude models unavailable",
            Self::AuthFailure(_) => "AI service authentication failed",
            Self::RateLimited { .. } => "AI service rate limit exceeded",
            Self::Upstream(_) => "AI service error",
        }
    }

    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::InvalidProvider(_) => Some("Use 'claude' or 'openai'.".into()),
            Self::ProviderUnavailable(_) => {
                Some("Try the other provider, or contact the site administrator.".into())
            }
            Self::AllModelsUnavailable { .. } => {
                Some("Try again later or switch to the OpenAI provider.".into())
            }
            Self::AuthFailure(_) => {
                Some("The server's API key was rejected. Please contact the site administrator.".into())
            }
            Self::RateLimited {
                retry_after_secs, ..
            } => Some(match retry_after_secs {
                Some(secs) => format!("Please wait {secs} seconds and try again."),
                None => "Please wait a moment and try again.".into(),
            }),
            Self::Upstream(_) => None,
        }
    }
}

/// Failures of a whole chat request.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("Daily token limit exceeded: {0}")]
    LimitExceeded(LimitExceeded),

    #[error("Session store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl From<BudgetError> for ChatError {
    fn from(e: BudgetError) -> Self {
        match e {
            BudgetError::LimitExceeded(details) => Self::LimitExceeded(details),
            BudgetError::Store(e) => Self::Store(e),
        }
    }
}

impl ChatError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Relay(e) => e.status_code(),
            Self::LimitExceeded(_) => 429,
            Self::Store(_) => 500,
            Self::InvalidRequest(_) => 400,
        }
    }
}
