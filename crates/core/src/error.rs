//! Error types for the TrailVerse domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; callers layer them into
//! their own errors with `#[from]`.

use thiserror::Error;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Whether the upstream rejected the requested model identifier.
    ///
    /// Drives the Claude fallback ladder: only these errors advance to the
    /// next candidate model.
    pub fn is_model_unavailable(&self) -> bool {
        match self {
            Self::ModelNotFound(_) => true,
            Self::ApiError {
                status_code,
                message,
            } => {
                let lower = message.to_lowercase();
                *status_code == 404
                    || lower.contains("not_found")
                    || lower.contains("model not found")
                    || (lower.contains("model") && lower.contains("not available"))
                    || (lower.contains("model") && lower.contains("does not exist"))
            }
            _ => false,
        }
    }

    /// Whether the upstream rejected our credentials.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            Self::AuthenticationFailed(_) => true,
            Self::ApiError {
                status_code,
                message,
            } => *status_code == 401 || message.to_lowercase().contains("authentication"),
            _ => false,
        }
    }

    /// Whether the upstream throttled the request.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::ApiError {
                status_code,
                message,
            } => *status_code == 429 || message.to_lowercase().contains("rate limit"),
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Error)]
pub enum FactsError {
    #[error("Facts request failed: {0}")]
    Request(String),

    #[error("Facts source returned status {status_code}")]
    Status { status_code: u16 },

    #[error("Failed to parse facts response: {0}")]
    Parse(String),

    #[error("Facts request timed out after {0}s")]
    Timeout(u64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        };
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn model_unavailable_classification() {
        assert!(ProviderError::ModelNotFound("claude-x".into()).is_model_unavailable());
        assert!(
            ProviderError::ApiError {
                status_code: 404,
                message: "{}".into()
            }
            .is_model_unavailable()
        );
        assert!(
            ProviderError::ApiError {
                status_code: 400,
                message: "model: claude-3-opus is not_found".into()
            }
            .is_model_unavailable()
        );
        assert!(!ProviderError::AuthenticationFailed("bad key".into()).is_model_unavailable());
        assert!(!ProviderError::Timeout("slow".into()).is_model_unavailable());
        assert!(
            !ProviderError::ApiError {
                status_code: 500,
                message: "overloaded".into()
            }
            .is_model_unavailable()
        );
    }

    #[test]
    fn auth_and_rate_limit_classification() {
        assert!(ProviderError::AuthenticationFailed("x".into()).is_auth_failure());
        assert!(
            ProviderError::ApiError {
                status_code: 400,
                message: "Authentication error: invalid x-api-key".into()
            }
            .is_auth_failure()
        );
        assert!(ProviderError::RateLimited { retry_after_secs: 5 }.is_rate_limited());
        assert!(
            ProviderError::ApiError {
                status_code: 500,
                message: "Rate limit reached for requests".into()
            }
            .is_rate_limited()
        );
        assert!(!ProviderError::Network("reset".into()).is_rate_limited());
    }

    #[test]
    fn store_error_displays_correctly() {
        let err = StoreError::QueryFailed("locked".into());
        assert!(err.to_string().contains("locked"));
    }
}
