//! OpenAI Chat Completions provider.
//!
//! OpenAI has no separate system channel, so the system prompt is sent as
//! the first `system` message of the conversation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use trailverse_core::error::ProviderError;
use trailverse_core::message::Role;
use trailverse_core::provider::*;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiProvider {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name: "openai".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            model: model.into(),
            timeout,
            client: crate::http_client(timeout),
        }
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// The single model this provider is configured for.
    pub fn model(&self) -> &str {
        &self.model
    }

    fn to_api_messages(request: &ProviderRequest) -> Vec<ApiMessage> {
        let system = request
            .system
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(|s| ApiMessage {
                role: "system".into(),
                content: s.to_string(),
            });

        system
            .into_iter()
            .chain(request.messages.iter().map(|m| ApiMessage {
                role: match m.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::System => "system",
                }
                .into(),
                content: m.content.clone(),
            }))
            .collect()
    }

    fn build_body(&self, request: &ProviderRequest) -> ChatRequest {
        let model = if request.model.is_empty() {
            self.model.clone()
        } else {
            request.model.clone()
        };
        ChatRequest {
            model,
            messages: Self::to_api_messages(request),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            top_p: request.top_p,
        }
    }

    fn to_provider_response(resp: ChatResponse) -> Result<ProviderResponse, ProviderError> {
        let content = resp
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::ApiError {
                status_code: 200,
                message: "OpenAI response contained no choices".into(),
            })?;

        let usage = resp.usage.unwrap_or_default();
        Ok(ProviderResponse {
            content,
            model: resp.model,
            usage: Usage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            },
        })
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(&request);

        debug!(provider = "openai", model = %body.model, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(crate::send_error)?;

        let status = response.status().as_u16();
        if status != 200 {
            let retry_after = crate::retry_after(&response);
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "OpenAI API error");
            return Err(crate::status_error("OpenAI", status, retry_after, &error_body));
        }

        let api_resp: ChatResponse = response.json().await.map_err(|e| ProviderError::ApiError {
            status_code: 200,
            message: format!("Failed to parse OpenAI response: {e}"),
        })?;

        Self::to_provider_response(api_resp)
    }

    fn models(&self) -> Vec<String> {
        vec![self.model.clone()]
    }
}

// --- OpenAI API types ---

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ApiMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: String,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}
