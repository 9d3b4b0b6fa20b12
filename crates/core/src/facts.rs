//! Request-scoped external facts injected into the system prompt.

use serde::{Deserialize, Serialize};

/// What the aggregator needs to decide which sources to consult.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactsQuery {
    pub user_message: String,
    #[serde(default)]
    pub park_code: Option<String>,
    #[serde(default)]
    pub park_name: Option<String>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
}

impl FactsQuery {
    /// Both coordinates, if both were supplied.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        self.lat.zip(self.lon)
    }

    /// Park code with surrounding whitespace removed; `None` if blank.
    pub fn park_code(&self) -> Option<&str> {
        self.park_code
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }

    /// Label used in prompt blocks and weather summaries.
    pub fn location_label(&self) -> &str {
        self.park_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or("this location")
    }
}

/// Ephemeral facts for one chat request. Never cached or persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactsBundle {
    pub weather_facts: Option<String>,
    pub nps_facts: Option<String>,
}

impl FactsBundle {
    pub fn is_empty(&self) -> bool {
        self.weather_facts.is_none() && self.nps_facts.is_none()
    }
}
