//! Keyword gating for fact sources.
//!
//! A cheap heuristic over free text. Misses and false hits are expected.

use regex_lite::Regex;
use std::sync::LazyLock;

/// Inflections accepted after every stem ("rainy", "colder", "forecasted").
const SUFFIXES: &str = "s|es|y|ies|ier|iest|er|est|ed|ing";

const WEATHER_STEMS: &[&str] = &[
    "weather", "forecast", "temperature", "rain", "snow", "wind", "sunny", "cloud", "storm",
    "hot", "hott", "cold", "precipitation", "humidity", "climate",
];

const NPS_STEMS: &[&str] = &[
    "alert", "closure", "permit", "trail", "activit", "highlight", "campground",
    "visitor center", "visitor centre", "ranger", "event", "weather", "forecast", "climate",
];

/// Whole-word match on any stem followed by at most one known inflection.
fn stem_pattern(stems: &[&str]) -> Option<Regex> {
    Regex::new(&format!(r"(?i)\b(?:{})(?:{SUFFIXES})?\b", stems.join("|"))).ok()
}

static WEATHER_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| stem_pattern(WEATHER_STEMS));

static NPS_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| stem_pattern(NPS_STEMS));

/// Whether the message asks about weather conditions.
pub fn wants_weather(message: &str) -> bool {
    WEATHER_PATTERN
        .as_ref()
        .is_some_and(|re| re.is_match(message))
}

/// Whether the message asks about park operations (alerts, trails, permits...).
pub fn wants_park_info(message: &str) -> bool {
    NPS_PATTERN.as_ref().is_some_and(|re| re.is_match(message))
}
