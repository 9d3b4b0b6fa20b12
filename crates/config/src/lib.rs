//! Configuration loading, validation, and management for TrailVerse.
//!
//! Loads configuration from `~/.trailverse/config.toml`, then applies
//! environment variable overrides. Every upstream credential is optional:
//! a missing key degrades that capability instead of failing startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.trailverse/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Default temperature when the caller sends none
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub providers: ProvidersConfig,

    #[serde(default)]
    pub facts: FactsConfig,

    #[serde(default)]
    pub budget: BudgetConfig,

    #[serde(default)]
    pub store: StoreConfig,
}

fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1024
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Honour `X-Real-IP` / `X-Forwarded-For` from a reverse proxy.
    #[serde(default)]
    pub trust_proxy: bool,

    /// CORS origins allowed to call the API.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

fn default_port() -> u16 {
    5001
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_allowed_origins() -> Vec<String> {
    vec!["http://localhost:3000".into()]
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            trust_proxy: false,
            allowed_origins: default_allowed_origins(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anthropic_api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anthropic_base_url: Option<String>,

    /// Claude fallback ladder, most capable first.
    #[serde(default = "default_claude_models")]
    pub claude_models: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_base_url: Option<String>,

    #[serde(default = "default_openai_model")]
    pub openai_model: String,

    /// Per-call upstream timeout
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_claude_models() -> Vec<String> {
    vec![
        "claude-sonnet-4-20250514".into(),
        "claude-3-7-sonnet-20250219".into(),
        "claude-3-5-sonnet-20241022".into(),
        "claude-3-5-haiku-20241022".into(),
    ]
}
fn default_openai_model() -> String {
    "gpt-4o-mini".into()
}
fn default_request_timeout() -> u64 {
    30
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            anthropic_api_key: None,
            anthropic_base_url: None,
            claude_models: default_claude_models(),
            openai_api_key: None,
            openai_base_url: None,
            openai_model: default_openai_model(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl std::fmt::Debug for ProvidersConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvidersConfig")
            .field("anthropic_api_key", &redact(&self.anthropic_api_key))
            .field("anthropic_base_url", &self.anthropic_base_url)
            .field("claude_models", &self.claude_models)
            .field("openai_api_key", &redact(&self.openai_api_key))
            .field("openai_base_url", &self.openai_base_url)
            .field("openai_model", &self.openai_model)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct FactsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openweather_api_key: Option<String>,

    #[serde(default = "default_openweather_url")]
    pub openweather_base_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nps_api_key: Option<String>,

    #[serde(default = "default_nps_url")]
    pub nps_base_url: String,

    #[serde(default = "default_facts_timeout")]
    pub timeout_secs: u64,
}

fn default_openweather_url() -> String {
    "https://api.openweathermap.org".into()
}
fn default_nps_url() -> String {
    "https://developer.nps.gov/api/v1".into()
}
fn default_facts_timeout() -> u64 {
    5
}

impl Default for FactsConfig {
    fn default() -> Self {
        Self {
            openweather_api_key: None,
            openweather_base_url: default_openweather_url(),
            nps_api_key: None,
            nps_base_url: default_nps_url(),
            timeout_secs: default_facts_timeout(),
        }
    }
}

impl std::fmt::Debug for FactsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactsConfig")
            .field("openweather_api_key", &redact(&self.openweather_api_key))
            .field("openweather_base_url", &self.openweather_base_url)
            .field("nps_api_key", &redact(&self.nps_api_key))
            .field("nps_base_url", &self.nps_base_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Daily token ceiling for the `user` role. Admins are unlimited.
    #[serde(default = "default_user_daily_tokens")]
    pub user_daily_tokens: u64,
}

fn default_user_daily_tokens() -> u64 {
    5000
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            user_daily_tokens: default_user_daily_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// "sqlite" or "memory"
    #[serde(default = "default_store_backend")]
    pub backend: String,

    /// SQLite database file. Defaults to `~/.trailverse/trailverse.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

fn default_store_backend() -> String {
    "sqlite".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: None,
        }
    }
}

impl StoreConfig {
    /// The SQLite path to open, falling back to the config directory.
    pub fn database_path(&self) -> PathBuf {
        self.path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| AppConfig::config_dir().join("trailverse.db"))
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.trailverse/config.toml),
    /// then apply environment overrides:
    /// - `ANTHROPIC_API_KEY`, `OPENAI_API_KEY`
    /// - `OPENWEATHER_API_KEY`, `NPS_API_KEY`
    /// - `TRAILVERSE_PORT`, `TRAILVERSE_DATABASE`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`. Empty values are ignored.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("ANTHROPIC_API_KEY") {
            self.providers.anthropic_api_key = Some(key);
        }
        if let Some(key) = get("OPENAI_API_KEY") {
            self.providers.openai_api_key = Some(key);
        }
        if let Some(key) = get("OPENWEATHER_API_KEY") {
            self.facts.openweather_api_key = Some(key);
        }
        if let Some(key) = get("NPS_API_KEY") {
            self.facts.nps_api_key = Some(key);
        }
        if let Some(port) = get("TRAILVERSE_PORT") {
            match port.parse() {
                Ok(port) => self.gateway.port = port,
                Err(_) => tracing::warn!(value = %port, "Ignoring invalid TRAILVERSE_PORT"),
            }
        }
        if let Some(path) = get("TRAILVERSE_DATABASE") {
            self.store.path = Some(path);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".trailverse")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.providers.claude_models.is_empty() {
            return Err(ConfigError::ValidationError(
                "providers.claude_models must list at least one model".into(),
            ));
        }

        if self.providers.request_timeout_secs == 0 || self.facts.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "timeouts must be greater than zero".into(),
            ));
        }

        match self.store.backend.as_str() {
            "sqlite" | "memory" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "store.backend must be 'sqlite' or 'memory', got '{other}'"
                )));
            }
        }

        Ok(())
    }

    pub fn has_claude(&self) -> bool {
        self.providers.anthropic_api_key.is_some()
    }

    pub fn has_openai(&self) -> bool {
        self.providers.openai_api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            gateway: GatewayConfig::default(),
            providers: ProvidersConfig::default(),
            facts: FactsConfig::default(),
            budget: BudgetConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
