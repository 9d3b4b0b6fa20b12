//! OpenWeather 5-day / 3-hour forecast, summarised per calendar day.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::debug;
use trailverse_core::error::FactsError;

const MS_TO_MPH: f64 = 2.23694;
const SUMMARY_DAYS: usize = 3;

/// A source of human-readable weather facts for a coordinate.
#[async_trait]
pub trait WeatherSource: Send + Sync {
    /// `Ok(None)` means the source is not usable (e.g. no API key).
    async fn forecast_facts(
        &self,
        lat: f64,
        lon: f64,
        location: &str,
    ) -> Result<Option<String>, FactsError>;
}

pub struct OpenWeatherClient {
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl OpenWeatherClient {
    pub fn new(api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            base_url: "https://api.openweathermap.org".into(),
            api_key,
            timeout,
            client: crate::http_client(timeout),
        }
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait]
impl WeatherSource for OpenWeatherClient {
    async fn forecast_facts(
        &self,
        lat: f64,
        lon: f64,
        location: &str,
    ) -> Result<Option<String>, FactsError> {
        let Some(api_key) = self.api_key.as_deref() else {
            debug!("OPENWEATHER_API_KEY not set, skipping weather facts");
            return Ok(None);
        };

        let url = format!("{}/data/2.5/forecast", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("lat", lat.to_string()),
                ("lon", lon.to_string()),
                ("appid", api_key.to_string()),
                ("units", "metric".to_string()),
            ])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| crate::request_error(e, self.timeout))?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(FactsError::Status {
                status_code: status,
            });
        }

        let forecast: ForecastResponse = response
            .json()
            .await
            .map_err(|e| FactsError::Parse(e.to_string()))?;

        let days = summarize_forecast(&forecast);
        if days.is_empty() {
            return Ok(None);
        }
        Ok(Some(format_weather_facts(location, &days)))
    }
}

// --- OpenWeather API types ---

#[derive(Debug, Deserialize)]
pub struct ForecastResponse {
    #[serde(default)]
    pub list: Vec<ForecastEntry>,
}

#[derive(Debug, Deserialize)]
pub struct ForecastEntry {
    /// Unix seconds, UTC
    pub dt: i64,
    pub main: ForecastMain,
    #[serde(default)]
    pub weather: Vec<ForecastCondition>,
    #[serde(default)]
    pub wind: Option<ForecastWind>,
}

#[derive(Debug, Deserialize)]
pub struct ForecastMain {
    pub temp: f64,
    pub temp_min: Option<f64>,
    pub temp_max: Option<f64>,
    #[serde(default)]
    pub humidity: f64,
}

#[derive(Debug, Deserialize)]
pub struct ForecastCondition {
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct ForecastWind {
    pub speed: f64,
}

/// One calendar day of aggregated forecast data (metric units).
#[derive(Debug, Clone, PartialEq)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub high_c: f64,
    pub low_c: f64,
    pub avg_humidity: f64,
    pub avg_wind_mph: f64,
    pub condition: String,
}

#[derive(Default)]
struct DayBucket {
    high: Option<f64>,
    low: Option<f64>,
    humidity: Vec<f64>,
    wind: Vec<f64>,
    /// description -> (count, first-seen order)
    conditions: HashMap<String, (usize, usize)>,
}

/// Bucket 3-hour entries by UTC date and aggregate each day.
pub fn summarize_forecast(forecast: &ForecastResponse) -> Vec<DailySummary> {
    let mut buckets: BTreeMap<NaiveDate, DayBucket> = BTreeMap::new();

    for (seen, entry) in forecast.list.iter().enumerate() {
        let Some(date) = DateTime::from_timestamp(entry.dt, 0).map(|dt| dt.date_naive()) else {
            continue;
        };
        let bucket = buckets.entry(date).or_default();

        let hi = entry.main.temp_max.unwrap_or(entry.main.temp);
        let lo = entry.main.temp_min.unwrap_or(entry.main.temp);
        bucket.high = Some(bucket.high.map_or(hi, |h| h.max(hi)));
        bucket.low = Some(bucket.low.map_or(lo, |l| l.min(lo)));
        bucket.humidity.push(entry.main.humidity);
        if let Some(wind) = &entry.wind {
            bucket.wind.push(wind.speed);
        }
        if let Some(cond) = entry.weather.first() {
            bucket
                .conditions
                .entry(cond.description.clone())
                .or_insert((0, seen))
                .0 += 1;
        }
    }

    buckets
        .into_iter()
        .filter_map(|(date, b)| {
            Some(DailySummary {
                date,
                high_c: b.high?,
                low_c: b.low?,
                avg_humidity: mean(&b.humidity),
                avg_wind_mph: mean(&b.wind) * MS_TO_MPH,
                condition: most_frequent(&b.conditions),
            })
        })
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn most_frequent(conditions: &HashMap<String, (usize, usize)>) -> String {
    conditions
        .iter()
        // highest count wins, earliest-seen breaks ties
        .max_by(|(_, (ca, sa)), (_, (cb, sb))| ca.cmp(cb).then(sb.cmp(sa)))
        .map(|(desc, _)| desc.clone())
        .unwrap_or_else(|| "conditions unavailable".into())
}

fn c_to_f(c: f64) -> f64 {
    c * 9.0 / 5.0 + 32.0
}

/// Render the first three days as a labelled, attributed block.
pub fn format_weather_facts(location: &str, days: &[DailySummary]) -> String {
    let mut out = format!("Weather forecast for {location} (source: OpenWeather):");
    for day in days.iter().take(SUMMARY_DAYS) {
        out.push_str(&format!(
            "\n- {}: high {:.0}°C ({:.0}°F), low {:.0}°C ({:.0}°F), {}, humidity {:.0}%, wind {:.0} mph",
            day.date.format("%a %b %-d"),
            day.high_c,
            c_to_f(day.high_c),
            day.low_c,
            c_to_f(day.low_c),
            day.condition,
            day.avg_humidity,
            day.avg_wind_mph,
        ));
    }
    out
}
