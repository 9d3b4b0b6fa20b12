//! National Park Service park details and active alerts.

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};
use trailverse_core::error::FactsError;

const MAX_ACTIVITIES: usize = 5;
const MAX_ALERTS: usize = 3;
const ALERT_CATEGORIES: [&str; 3] = ["information", "caution", "closure"];

/// A source of human-readable park facts for an NPS park code.
#[async_trait]
pub trait ParkInfoSource: Send + Sync {
    /// `Ok(None)` means the source is not usable or knows nothing useful.
    async fn park_facts(&self, park_code: &str) -> Result<Option<String>, FactsError>;
}

pub struct NpsClient {
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl NpsClient {
    pub fn new(api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            base_url: "https://developer.nps.gov/api/v1".into(),
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

    async fn get_data<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        park_code: &str,
        api_key: &str,
    ) -> Result<Vec<T>, FactsError> {
        let url = format!("{}/{endpoint}", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("X-Api-Key", api_key)
            .query(&[("parkCode", park_code)])
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

        let envelope: NpsEnvelope<T> = response
            .json()
            .await
            .map_err(|e| FactsError::Parse(e.to_string()))?;
        Ok(envelope.data)
    }
}

#[async_trait]
impl ParkInfoSource for NpsClient {
    async fn park_facts(&self, park_code: &str) -> Result<Option<String>, FactsError> {
        let Some(api_key) = self.api_key.as_deref() else {
            debug!("NPS_API_KEY not set, skipping park facts");
            return Ok(None);
        };

        let (parks, alerts) = futures::future::join(
            self.get_data::<NpsPark>("parks", park_code, api_key),
            self.get_data::<NpsAlert>("alerts", park_code, api_key),
        )
        .await;

        match (parks, alerts) {
            (Err(parks_err), Err(_)) => Err(parks_err),
            (parks, alerts) => {
                let parks = parks.unwrap_or_else(|e| {
                    warn!(park_code, error = %e, "NPS park details unavailable");
                    Vec::new()
                });
                let alerts = alerts
                    .inspect_err(|e| warn!(park_code, error = %e, "NPS alerts unavailable"))
                    .ok();
                Ok(format_park_facts(parks.first(), alerts.as_deref()))
            }
        }
    }
}

// --- NPS API types ---

#[derive(Debug, Deserialize)]
struct NpsEnvelope<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NpsPark {
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub activities: Vec<NpsNamed>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NpsNamed {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NpsAlert {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub description: String,
}

fn is_reported_category(category: &str) -> bool {
    let lower = category.to_lowercase();
    ALERT_CATEGORIES.iter().any(|c| lower.contains(c))
}

/// Render park highlights and alerts.
///
/// `alerts = None` means the alerts call failed and the section is left
/// out; `Some(&[])` renders an explicit "None reported" line. Returns
/// `None` when there is nothing to say at all.
pub fn format_park_facts(park: Option<&NpsPark>, alerts: Option<&[NpsAlert]>) -> Option<String> {
    let mut lines = Vec::new();

    if let Some(park) = park {
        if !park.full_name.is_empty() {
            lines.push(format!("Park: {}", park.full_name));
        }
        let activities: Vec<&str> = park
            .activities
            .iter()
            .take(MAX_ACTIVITIES)
            .map(|a| a.name.as_str())
            .collect();
        if !activities.is_empty() {
            lines.push(format!("Highlights: {}", activities.join(", ")));
        }
    }

    if let Some(alerts) = alerts {
        // An empty alert list for an unknown park says nothing useful.
        if park.is_none() && alerts.is_empty() {
            return None;
        }
        let reported: Vec<&NpsAlert> = alerts
            .iter()
            .filter(|a| is_reported_category(&a.category))
            .take(MAX_ALERTS)
            .collect();
        if reported.is_empty() {
            lines.push("Active alerts: None reported".into());
        } else {
            lines.push("Active alerts:".into());
            for alert in reported {
                lines.push(format!(
                    "- [{}] {}: {}",
                    alert.category,
                    alert.title,
                    alert.description.trim()
                ));
            }
        }
    }

    (!lines.is_empty()).then(|| lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn park() -> NpsPark {
        NpsPark {
            full_name: "Yosemite National Park".into(),
            activities: ["Hiking", "Camping", "Climbing", "Fishing", "Biking", "Skiing"]
                .iter()
                .map(|n| NpsNamed { name: n.to_string() })
                .collect(),
        }
    }

    fn alert(category: &str, title: &str) -> NpsAlert {
        NpsAlert {
            title: title.into(),
            category: category.into(),
            description: "See park website. ".into(),
        }
    }

    #[test]
    fn lists_up_to_five_activities() {
        let text = format_park_facts(Some(&park()), Some(&[])).unwrap();
        assert!(text.contains("Park: Yosemite National Park"));
        assert!(text.contains("Highlights: Hiking, Camping, Climbing, Fishing, Biking"));
        assert!(!text.contains("Skiing"));
    }

    #[test]
    fn no_alerts_is_reported_explicitly() {
        let text = format_park_facts(Some(&park()), Some(&[])).unwrap();
        assert!(text.contains("Active alerts: None reported"));
    }

    #[test]
    fn failed_alerts_call_omits_section() {
        let text = format_park_facts(Some(&park()), None).unwrap();
        assert!(!text.contains("Active alerts"));
    }

    #[test]
    fn alerts_are_filtered_and_capped() {
        let alerts = vec![
            alert("Park Closure", "Tioga Road closed"),
            alert("Danger", "Rockfall"),
            alert("Caution", "Icy trails"),
            alert("Information", "Reservations required"),
            alert("Information", "Shuttle schedule"),
        ];
        let text = format_park_facts(Some(&park()), Some(&alerts)).unwrap();
        assert!(text.contains("- [Park Closure] Tioga Road closed: See park website."));
        assert!(text.contains("Icy trails"));
        assert!(text.contains("Reservations required"));
        assert!(!text.contains("Rockfall"));
        assert!(!text.contains("Shuttle schedule"));
    }

    #[test]
    fn alerts_only_when_details_failed() {
        let alerts = vec![alert("Closure", "Mist Trail closed")];
        let text = format_park_facts(None, Some(&alerts)).unwrap();
        assert!(!text.contains("Park:"));
        assert!(text.contains("Mist Trail closed"));
    }

    #[test]
    fn nothing_known_is_none() {
        assert!(format_park_facts(None, Some(&[])).is_none());
        assert!(format_park_facts(None, None).is_none());
    }

    #[test]
    fn envelope_parses() {
        let json = serde_json::json!({
            "total": "1",
            "data": [{"fullName": "Zion National Park", "parkCode": "zion",
                      "activities": [{"id": "x", "name": "Canyoneering"}]}]
        });
        let env: NpsEnvelope<NpsPark> = serde_json::from_value(json).unwrap();
        assert_eq!(env.data[0].full_name, "Zion National Park");
        assert_eq!(env.data[0].activities[0].name, "Canyoneering");
    }

    #[tokio::test]
    async fn missing_api_key_yields_none() {
        let client = NpsClient::new(None, Duration::from_secs(5));
        assert!(client.park_facts("yose").await.unwrap().is_none());
    }
}
