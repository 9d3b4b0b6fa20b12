//! Claude model fallback ladder.
//!
//! Walks an ordered list of Claude model identifiers, most capable first.
//! Only a model-availability failure advances to the next rung; any other
//! failure ends the walk immediately.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use trailverse_core::error::ProviderError;
use trailverse_core::provider::{Provider, ProviderRequest, ProviderResponse};

const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, thiserror::Error)]
pub enum LadderError {
    /// A non-availability failure stopped the walk.
    #[error("{model}: {error}")]
    Aborted { model: String, error: ProviderError },

    /// Every candidate reported itself unavailable.
    #[error("all Claude models unavailable: {last_error}")]
    Exhausted {
        attempted: Vec<String>,
        last_error: ProviderError,
    },
}

pub struct ClaudeLadder {
    provider: Arc<dyn Provider>,
    models: Vec<String>,
    attempt_timeout: Duration,
}

impl ClaudeLadder {
    pub fn new(provider: Arc<dyn Provider>, models: Vec<String>) -> Self {
        Self {
            provider,
            models,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }

    /// Bound each individual model attempt.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    /// The order models will be tried in: an explicitly requested model
    /// first, then the configured ladder, without repeats.
    pub fn candidates(&self, requested: Option<&str>) -> Vec<String> {
        let requested = requested.map(str::trim).filter(|m| !m.is_empty());
        let mut out: Vec<String> = Vec::with_capacity(self.models.len() + 1);
        for model in requested.into_iter().chain(self.models.iter().map(String::as_str)) {
            if !out.iter().any(|m| m == model) {
                out.push(model.to_string());
            }
        }
        out
    }

    /// Run `request` against each candidate until one answers.
    ///
    /// The request's own `model` field is ignored; pass an explicitly
    /// requested model as `requested`.
    pub async fn complete(
        &self,
        request: &ProviderRequest,
        requested: Option<&str>,
    ) -> Result<ProviderResponse, LadderError> {
        let candidates = self.candidates(requested);
        let total = candidates.len();
        let mut last_error =
            ProviderError::NotConfigured("No Claude models configured".into());

        for (i, model) in candidates.iter().enumerate() {
            info!(
                provider = %self.provider.name(),
                model = %model,
                attempt = i + 1,
                total,
                "Claude ladder: trying model"
            );

            let attempt = tokio::time::timeout(
                self.attempt_timeout,
                self.provider.complete(request.with_model(model.as_str())),
            )
            .await;

            let error = match attempt {
                Ok(Ok(mut response)) => {
                    if response.model.is_empty() {
                        response.model = model.clone();
                    }
                    return Ok(response);
                }
                Ok(Err(e)) => e,
                Err(_) => ProviderError::Timeout(format!(
                    "Model '{model}' timed out after {}s",
                    self.attempt_timeout.as_secs()
                )),
            };

            if !error.is_model_unavailable() {
                warn!(model = %model, error = %error, "Claude ladder: aborting on non-availability error");
                return Err(LadderError::Aborted {
                    model: model.clone(),
                    error,
                });
            }

            warn!(model = %model, error = %error, "Claude ladder: model unavailable, trying next");
            last_error = error;
        }

        Err(LadderError::Exhausted {
            attempted: candidates,
            last_error,
        })
    }
}
