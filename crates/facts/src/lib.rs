//! Fact gathering for TrailVerse chat prompts.
//!
//! Given a user message and park/location context, decides which external
//! sources are worth consulting (weather forecast, NPS park details and
//! alerts), fetches them concurrently, and degrades each failed source to
//! `None` without affecting the other.

pub mod aggregator;
pub mod keywords;
pub mod nps;
pub mod weather;

pub use aggregator::FactsAggregator;
pub use nps::{NpsClient, ParkInfoSource};
pub use weather::{OpenWeatherClient, WeatherSource};

/// Build an HTTP client with a bounded per-call timeout.
/// Requests also set their own timeout, so the bound survives the fallback.
pub(crate) fn http_client(timeout: std::time::Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to build HTTP client, using defaults");
            reqwest::Client::new()
        })
}

/// Map a reqwest failure onto the facts error taxonomy.
pub(crate) fn request_error(
    e: reqwest::Error,
    timeout: std::time::Duration,
) -> trailverse_core::error::FactsError {
    use trailverse_core::error::FactsError;
    if e.is_timeout() {
        FactsError::Timeout(timeout.as_secs())
    } else if let Some(status) = e.status() {
        FactsError::Status {
            status_code: status.as_u16(),
        }
    } else {
        FactsError::Request(e.to_string())
    }
}
