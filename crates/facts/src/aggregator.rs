//! Concurrent, best-effort fact gathering.

use crate::keywords::{wants_park_info, wants_weather};
use crate::nps::{NpsClient, ParkInfoSource};
use crate::weather::{OpenWeatherClient, WeatherSource};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use trailverse_core::error::FactsError;
use trailverse_core::facts::{FactsBundle, FactsQuery};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Fans out to the relevant fact sources and waits for both to settle.
pub struct FactsAggregator {
    weather: Option<Arc<dyn WeatherSource>>,
    parks: Option<Arc<dyn ParkInfoSource>>,
    timeout: Duration,
}

impl FactsAggregator {
    /// An aggregator with no sources; every lookup yields an empty bundle.
    pub fn new() -> Self {
        Self {
            weather: None,
            parks: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_weather(mut self, source: Arc<dyn WeatherSource>) -> Self {
        self.weather = Some(source);
        self
    }

    pub fn with_parks(mut self, source: Arc<dyn ParkInfoSource>) -> Self {
        self.parks = Some(source);
        self
    }

    /// Upper bound for each branch, on top of the per-call HTTP timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build from configuration. Sources without an API key are left out.
    pub fn from_config(config: &trailverse_config::FactsConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs);
        let mut aggregator = Self::new().with_timeout(timeout);

        if config.openweather_api_key.is_some() {
            aggregator = aggregator.with_weather(Arc::new(
                OpenWeatherClient::new(config.openweather_api_key.clone(), timeout)
                    .with_base_url(&config.openweather_base_url),
            ));
        }
        if config.nps_api_key.is_some() {
            aggregator = aggregator.with_parks(Arc::new(
                NpsClient::new(config.nps_api_key.clone(), timeout)
                    .with_base_url(&config.nps_base_url),
            ));
        }
        aggregator
    }

    pub fn has_weather(&self) -> bool {
        self.weather.is_some()
    }

    pub fn has_parks(&self) -> bool {
        self.parks.is_some()
    }

    /// Gather whichever facts the message calls for.
    ///
    /// Both branches run concurrently; a failure or timeout in one yields
    /// `None` for that slot only. Never fails.
    pub async fn fetch_relevant_facts(&self, query: &FactsQuery) -> FactsBundle {
        let location = query.location_label();

        let weather = async {
            let source = self.weather.as_ref()?;
            let (lat, lon) = query.coordinates()?;
            if !wants_weather(&query.user_message) {
                return None;
            }
            settle("weather", self.timeout, source.forecast_facts(lat, lon, location)).await
        };

        let parks = async {
            let source = self.parks.as_ref()?;
            let park_code = query.park_code()?;
            if !wants_park_info(&query.user_message) {
                return None;
            }
            settle("nps", self.timeout, source.park_facts(park_code)).await
        };

        let (weather_facts, nps_facts) = tokio::join!(weather, parks);

        debug!(
            weather = weather_facts.is_some(),
            nps = nps_facts.is_some(),
            "Facts gathered"
        );

        FactsBundle {
            weather_facts,
            nps_facts,
        }
    }
}

impl Default for FactsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// Await one source under `timeout`, logging and discarding any failure.
async fn settle<F>(source: &str, timeout: Duration, fetch: F) -> Option<String>
where
    F: Future<Output = Result<Option<String>, FactsError>>,
{
    match tokio::time::timeout(timeout, fetch).await {
        Ok(Ok(facts)) => facts,
        Ok(Err(e)) => {
            warn!(source, error = %e, "Fact source failed, continuing without it");
            None
        }
        Err(_) => {
            warn!(
                source,
                timeout_secs = timeout.as_secs(),
                "Fact source timed out, continuing without it"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FixedWeather {
        result: Result<Option<String>, String>,
        delay: Duration,
        calls: Mutex<usize>,
    }

    impl FixedWeather {
        fn ok(text: &str) -> Self {
            Self {
                result: Ok(Some(text.into())),
                delay: Duration::ZERO,
                calls: Mutex::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                result: Err("connection refused".into()),
                delay: Duration::ZERO,
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl WeatherSource for FixedWeather {
        async fn forecast_facts(
            &self,
            _lat: f64,
            _lon: f64,
            _location: &str,
        ) -> Result<Option<String>, FactsError> {
            *self.calls.lock().unwrap() += 1;
            tokio::time::sleep(self.delay).await;
            self.result.clone().map_err(FactsError::Request)
        }
    }

    struct FixedParks {
        result: Result<Option<String>, String>,
        delay: Duration,
        calls: Mutex<usize>,
    }

    impl FixedParks {
        fn ok(text: &str) -> Self {
            Self {
                result: Ok(Some(text.into())),
                delay: Duration::ZERO,
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl ParkInfoSource for FixedParks {
        async fn park_facts(&self, _park_code: &str) -> Result<Option<String>, FactsError> {
            *self.calls.lock().unwrap() += 1;
            tokio::time::sleep(self.delay).await;
            self.result.clone().map_err(FactsError::Request)
        }
    }

    fn query(message: &str) -> FactsQuery {
        FactsQuery {
            user_message: message.into(),
            park_code: Some("zion".into()),
            park_name: Some("Zion National Park".into()),
            lat: Some(37.3),
            lon: Some(-113.0),
        }
    }

    #[tokio::test]
    async fn weather_question_without_park_code() {
        let weather = Arc::new(FixedWeather::ok("sunny all week"));
        let parks = Arc::new(FixedParks::ok("no closures"));
        let agg = FactsAggregator::new()
            .with_weather(weather.clone())
            .with_parks(parks.clone());

        let mut q = query("What's the weather tomorrow?");
        q.park_code = None;

        let facts = agg.fetch_relevant_facts(&q).await;
        assert_eq!(facts.weather_facts.as_deref(), Some("sunny all week"));
        assert!(facts.nps_facts.is_none());
        assert_eq!(parks.calls(), 0);
    }

    #[tokio::test]
    async fn weather_needs_both_coordinates() {
        let weather = Arc::new(FixedWeather::ok("sunny"));
        let agg = FactsAggregator::new().with_weather(weather.clone());

        let mut q = query("Will it rain?");
        q.lon = None;

        assert!(agg.fetch_relevant_facts(&q).await.weather_facts.is_none());
        assert_eq!(weather.calls(), 0);
    }

    #[tokio::test]
    async fn irrelevant_message_skips_all_sources() {
        let weather = Arc::new(FixedWeather::ok("sunny"));
        let parks = Arc::new(FixedParks::ok("alerts"));
        let agg = FactsAggregator::new()
            .with_weather(weather.clone())
            .with_parks(parks.clone());

        let facts = agg.fetch_relevant_facts(&query("Tell me a fun fact")).await;
        assert!(facts.is_empty());
        assert_eq!(weather.calls(), 0);
        assert_eq!(parks.calls(), 0);
    }

    #[tokio::test]
    async fn weather_failure_does_not_affect_nps() {
        let agg = FactsAggregator::new()
            .with_weather(Arc::new(FixedWeather::failing()))
            .with_parks(Arc::new(FixedParks::ok("Active alerts: None reported")));

        // "weather" triggers both sources.
        let facts = agg.fetch_relevant_facts(&query("weather and alerts?")).await;
        assert!(facts.weather_facts.is_none());
        assert_eq!(facts.nps_facts.as_deref(), Some("Active alerts: None reported"));
    }

    #[tokio::test(start_paused = true)]
    async fn branches_run_concurrently_and_time_out_independently() {
        let slow_weather = FixedWeather {
            delay: Duration::from_secs(60),
            ..FixedWeather::ok("late")
        };
        let parks = FixedParks {
            delay: Duration::from_secs(3),
            ..FixedParks::ok("on time")
        };
        let agg = FactsAggregator::new()
            .with_weather(Arc::new(slow_weather))
            .with_parks(Arc::new(parks))
            .with_timeout(Duration::from_secs(5));

        let started = tokio::time::Instant::now();
        let facts = agg.fetch_relevant_facts(&query("forecast and trails")).await;

        assert!(facts.weather_facts.is_none());
        assert_eq!(facts.nps_facts.as_deref(), Some("on time"));
        // Bounded by the slower branch's timeout, not the sum.
        assert!(started.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test]
    async fn no_sources_configured() {
        let agg = FactsAggregator::default();
        assert!(!agg.has_weather());
        assert!(!agg.has_parks());
        assert!(agg.fetch_relevant_facts(&query("weather alerts")).await.is_empty());
    }

    #[test]
    fn from_config_skips_unkeyed_sources() {
        let mut config = trailverse_config::FactsConfig::default();
        assert!(!FactsAggregator::from_config(&config).has_weather());

        config.nps_api_key = Some("nps".into());
        let agg = FactsAggregator::from_config(&config);
        assert!(agg.has_parks());
        assert!(!agg.has_weather());
    }
}
