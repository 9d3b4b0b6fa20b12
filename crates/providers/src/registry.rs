//! Provider registry — holds the providers configured at start-up.
//!
//! A provider whose API key is absent is simply not registered; callers
//! see it as unavailable rather than failing at request time.

use crate::anthropic::AnthropicProvider;
use crate::ladder::ClaudeLadder;
use crate::openai::OpenAiProvider;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use trailverse_core::provider::{Provider, ProviderKind};

/// One entry of the providers listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderAvailability {
    pub id: &'static str,
    pub name: &'static str,
    pub available: bool,
    pub models: Vec<String>,
}

#[derive(Default)]
pub struct ProviderRegistry {
    claude: Option<Arc<ClaudeLadder>>,
    openai: Option<Arc<dyn Provider>>,
}

impl ProviderRegistry {
    /// An empty registry; every provider reports unavailable.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_claude(mut self, ladder: ClaudeLadder) -> Self {
        self.claude = Some(Arc::new(ladder));
        self
    }

    pub fn with_openai(mut self, provider: Arc<dyn Provider>) -> Self {
        self.openai = Some(provider);
        self
    }

    /// Build from configuration, registering only providers with a key.
    pub fn from_config(config: &trailverse_config::ProvidersConfig) -> Self {
        let timeout = Duration::from_secs(config.request_timeout_secs);
        let mut registry = Self::new();

        if let Some(key) = config.anthropic_api_key.as_deref() {
            let mut provider =
                AnthropicProvider::new(key, timeout).with_models(config.claude_models.clone());
            if let Some(url) = &config.anthropic_base_url {
                provider = provider.with_base_url(url);
            }
            registry = registry.with_claude(
                ClaudeLadder::new(Arc::new(provider), config.claude_models.clone())
                    .with_attempt_timeout(timeout),
            );
            info!(models = config.claude_models.len(), "Claude provider configured");
        }

        if let Some(key) = config.openai_api_key.as_deref() {
            let mut provider = OpenAiProvider::new(key, &config.openai_model, timeout);
            if let Some(url) = &config.openai_base_url {
                provider = provider.with_base_url(url);
            }
            registry = registry.with_openai(Arc::new(provider));
            info!(model = %config.openai_model, "OpenAI provider configured");
        }

        registry
    }

    pub fn claude(&self) -> Option<Arc<ClaudeLadder>> {
        self.claude.clone()
    }

    pub fn openai(&self) -> Option<Arc<dyn Provider>> {
        self.openai.clone()
    }

    pub fn is_configured(&self, kind: ProviderKind) -> bool {
        match kind {
            ProviderKind::Claude => self.claude.is_some(),
            ProviderKind::Openai => self.openai.is_some(),
        }
    }

    /// Configured providers, Claude first.
    pub fn availability(&self) -> Vec<ProviderAvailability> {
        let mut out = Vec::new();
        if let Some(ladder) = &self.claude {
            out.push(ProviderAvailability {
                id: ProviderKind::Claude.id(),
                name: ProviderKind::Claude.display_name(),
                available: true,
                models: ladder.models().to_vec(),
            });
        }
        if let Some(provider) = &self.openai {
            out.push(ProviderAvailability {
                id: ProviderKind::Openai.id(),
                name: ProviderKind::Openai.display_name(),
                available: true,
                models: provider.models(),
            });
        }
        out
    }
}
