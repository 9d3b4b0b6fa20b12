//! LLM provider implementations for TrailVerse.
//!
//! Both backends implement `trailverse_core::Provider`. The registry holds
//! whichever ones were configured at start-up; the Claude ladder walks the
//! configured model identifiers until one answers.

pub mod anthropic;
pub mod ladder;
pub mod openai;
pub mod registry;

pub use anthropic::AnthropicProvider;
pub use ladder::{ClaudeLadder, LadderError};
pub use openai::OpenAiProvider;
pub use registry::{ProviderAvailability, ProviderRegistry};

use serde::Deserialize;
use std::time::Duration;
use tracing::warn;
use trailverse_core::error::ProviderError;

/// Falls back to a default client when the TLS backend cannot be built.
/// Requests also set their own timeout, so the bound holds either way.
pub(crate) fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Failed to build HTTP client, using defaults");
            reqwest::Client::new()
        })
}

pub(crate) fn send_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

/// Both vendors wrap failures as `{"error": {"type"|"code", "message"}}`.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default)]
    message: String,
}

/// Extract a readable message from an upstream error body, keeping the
/// vendor's error type/code so callers can classify it.
pub(crate) fn upstream_message(body: &str) -> String {
    let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) else {
        return body.trim().to_string();
    };
    let detail = envelope.error;
    let tag = detail
        .code
        .as_ref()
        .and_then(|c| c.as_str().map(str::to_string))
        .or(detail.kind);
    match tag {
        Some(tag) if !tag.is_empty() => format!("{tag}: {}", detail.message),
        _ => detail.message,
    }
}

/// Map a non-200 upstream status to a provider error.
pub(crate) fn status_error(
    provider: &str,
    status: u16,
    retry_after_secs: Option<u64>,
    body: &str,
) -> ProviderError {
    let message = upstream_message(body);
    match status {
        429 => ProviderError::RateLimited {
            retry_after_secs: retry_after_secs.unwrap_or(5),
        },
        401 | 403 => ProviderError::AuthenticationFailed(format!(
            "{provider} rejected the API key: {message}"
        )),
        404 => ProviderError::ModelNotFound(message),
        _ => ProviderError::ApiError {
            status_code: status,
            message,
        },
    }
}

pub(crate) fn retry_after(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}
