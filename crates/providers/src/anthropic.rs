//! Anthropic Messages API provider.
//!
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as a top-level field, never as a message turn

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use trailverse_core::error::ProviderError;
use trailverse_core::message::{Message, Role};
use trailverse_core::provider::*;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 1024;

pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    models: Vec<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            models: Vec::new(),
            timeout,
            client: crate::http_client(timeout),
        }
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Advertise the model identifiers this provider is used with.
    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.models = models;
        self
    }

    /// Fold any system turns into the top-level system prompt.
    fn extract_system(request: &ProviderRequest) -> (Option<String>, Vec<&Message>) {
        let mut system_parts: Vec<&str> = request.system.as_deref().into_iter().collect();
        let mut turns: Vec<&Message> = Vec::new();

        for msg in &request.messages {
            match msg.role {
                Role::System => system_parts.push(&msg.content),
                _ => turns.push(msg),
            }
        }

        let system_parts: Vec<&str> = system_parts
            .into_iter()
            .filter(|s| !s.trim().is_empty())
            .collect();
        let system = (!system_parts.is_empty()).then(|| system_parts.join("\n\n"));
        (system, turns)
    }

    fn build_body(request: &ProviderRequest) -> MessagesRequest {
        let (system, turns) = Self::extract_system(request);
        MessagesRequest {
            model: request.model.clone(),
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            messages: turns
                .into_iter()
                .map(|m| ApiMessage {
                    role: m.role.as_str().to_string(),
                    content: m.content.clone(),
                })
                .collect(),
            system,
            temperature: request.temperature,
            top_p: request.top_p,
        }
    }

    fn to_provider_response(resp: MessagesResponse) -> ProviderResponse {
        let content = resp
            .content
            .iter()
            .filter_map(|block| match block {
                ResponseBlock::Text { text } => Some(text.as_str()),
                ResponseBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        ProviderResponse {
            content,
            model: resp.model,
            usage: Usage {
                input_tokens: resp.usage.input_tokens,
                output_tokens: resp.usage.output_tokens,
            },
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = Self::build_body(&request);

        debug!(provider = "anthropic", model = %request.model, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(crate::send_error)?;

        let status = response.status().as_u16();
        if status != 200 {
            let retry_after = crate::retry_after(&response);
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, model = %request.model, body = %error_body, "Anthropic API error");
            return Err(crate::status_error("Anthropic", status, retry_after, &error_body));
        }

        let api_resp: MessagesResponse =
            response
                .json()
                .await
                .map_err(|e| ProviderError::ApiError {
                    status_code: 200,
                    message: format!("Failed to parse Anthropic response: {e}"),
                })?;

        Ok(Self::to_provider_response(api_resp))
    }

    fn models(&self) -> Vec<String> {
        self.models.clone()
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    model: String,
    #[serde(default)]
    content: Vec<ResponseBlock>,
    usage: ApiUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}
