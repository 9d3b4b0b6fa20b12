//! Model relay: one normalised model call per chat turn.

use crate::error::RelayError;
use crate::prompt::{build_system_prompt, sanitize_messages};
use serde::Serialize;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};
use trailverse_core::facts::FactsBundle;
use trailverse_core::message::Message;
use trailverse_core::provider::{ProviderKind, ProviderRequest, Usage};
use trailverse_providers::{LadderError, ProviderRegistry};

/// Everything the relay needs for one call.
#[derive(Debug, Clone, Default)]
pub struct RelayRequest {
    /// Raw provider id from the caller; validated here.
    pub provider: String,
    pub model: Option<String>,
    pub messages: Vec<Message>,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub park_name: Option<String>,
    pub facts: FactsBundle,
}

/// The uniform shape returned regardless of provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelayResponse {
    pub content: String,
    pub provider: ProviderKind,
    pub model: String,
    pub usage: Usage,
}

pub struct ModelRelay {
    registry: Arc<ProviderRegistry>,
    default_temperature: f32,
    default_max_tokens: u32,
}

impl ModelRelay {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            default_temperature: 0.7,
            default_max_tokens: 1024,
        }
    }

    pub fn with_defaults(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.default_temperature = temperature;
        self.default_max_tokens = max_tokens;
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub async fn relay(&self, request: RelayRequest) -> Result<RelayResponse, RelayError> {
        let kind = ProviderKind::from_str(request.provider.trim())
            .map_err(RelayError::InvalidProvider)?;

        let (messages, inline_system) = sanitize_messages(request.messages);
        let system = build_system_prompt(
            request.system_prompt.as_deref(),
            &inline_system,
            request.park_name.as_deref(),
            &request.facts,
        );

        let provider_request = ProviderRequest {
            model: String::new(),
            messages,
            system: Some(system),
            temperature: request.temperature.unwrap_or(self.default_temperature),
            max_tokens: Some(request.max_tokens.unwrap_or(self.default_max_tokens)),
            top_p: request.top_p,
        };

        debug!(
            provider = kind.id(),
            turns = provider_request.messages.len(),
            weather_facts = request.facts.weather_facts.is_some(),
            nps_facts = request.facts.nps_facts.is_some(),
            "Relaying chat request"
        );

        let response = match kind {
            ProviderKind::Claude => {
                let ladder = self
                    .registry
                    .claude()
                    .ok_or(RelayError::ProviderUnavailable(kind))?;
                ladder
                    .complete(&provider_request, request.model.as_deref())
                    .await
                    .map_err(|e| match e {
                        LadderError::Exhausted {
                            attempted,
                            last_error,
                        } => {
                            warn!(attempted = ?attempted, error = %last_error, "Every Claude model was unavailable");
                            RelayError::AllModelsUnavailable {
                                attempted,
                                last_error: last_error.to_string(),
                            }
                        }
                        LadderError::Aborted { error, .. } => RelayError::from_provider(error),
                    })?
            }
            ProviderKind::Openai => {
                let provider = self
                    .registry
                    .openai()
                    .ok_or(RelayError::ProviderUnavailable(kind))?;
                let model = provider.models().into_iter().next().unwrap_or_default();
                if let Some(requested) = request.model.as_deref().filter(|m| *m != model) {
                    debug!(requested, model = %model, "OpenAI uses its configured model");
                }
                provider
                    .complete(provider_request.with_model(model))
                    .await
                    .map_err(|e| {
                        warn!(provider = "openai", error = %e, "OpenAI request failed");
                        RelayError::from_provider(e)
                    })?
            }
        };

        info!(
            provider = kind.id(),
            model = %response.model,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "Relay succeeded"
        );

        Ok(RelayResponse {
            content: response.content,
            provider: kind,
            model: response.model,
            usage: response.usage,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::ScriptedProvider;
    use super::*;
    use trailverse_core::error::ProviderError;
    use trailverse_core::message::Role;
    use trailverse_providers::ClaudeLadder;

    const LADDER: [&str; 4] = [
        "claude-sonnet-4-20250514",
        "claude-3-7-sonnet-20250219",
        "claude-3-5-sonnet-20241022",
        "claude-3-5-haiku-20241022",
    ];

    fn ladder_models() -> Vec<String> {
        LADDER.iter().map(|m| m.to_string()).collect()
    }

    fn claude_relay(provider: Arc<ScriptedProvider>) -> ModelRelay {
        let registry = ProviderRegistry::new().with_claude(ClaudeLadder::new(provider, ladder_models()));
        ModelRelay::new(Arc::new(registry))
    }

    fn request(provider: &str) -> RelayRequest {
        RelayRequest {
            provider: provider.into(),
            messages: vec![
                Message::system("Answer briefly."),
                Message::user("Any closures at Yosemite?"),
            ],
            park_name: Some("Yosemite National Park".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn unknown_provider_is_rejected_before_any_call() {
        let provider = Arc::new(ScriptedProvider::always("hi"));
        let relay = claude_relay(provider.clone());

        let err = relay.relay(request("gemini")).await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidProvider(ref p) if p == "gemini"));
        assert_eq!(err.status_code(), 400);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn unconfigured_provider_is_unavailable() {
        let relay = ModelRelay::new(Arc::new(ProviderRegistry::new()));

        let err = relay.relay(request("openai")).await.unwrap_err();
        assert!(matches!(err, RelayError::ProviderUnavailable(ProviderKind::Openai)));
        assert_eq!(err.status_code(), 500);

        let err = relay.relay(request("claude")).await.unwrap_err();
        assert!(matches!(err, RelayError::ProviderUnavailable(ProviderKind::Claude)));
    }

    #[tokio::test]
    async fn system_turns_move_into_the_system_prompt() {
        let provider = Arc::new(ScriptedProvider::always("Tioga Road is closed."));
        let relay = claude_relay(provider.clone());

        let mut req = request("claude");
        req.facts.nps_facts = Some("Active alerts:\n- [Closure] Tioga Road closed: Snow.".into());
        let response = relay.relay(req).await.unwrap();

        assert_eq!(response.content, "Tioga Road is closed.");
        assert_eq!(response.provider, ProviderKind::Claude);
        assert_eq!(response.model, LADDER[0]);
        assert_eq!(response.usage, Usage { input_tokens: 100, output_tokens: 50 });

        let sent = provider.last_request().unwrap();
        assert!(sent.messages.iter().all(|m| m.role != Role::System));
        let system = sent.system.unwrap();
        assert!(system.contains("Answer briefly."));
        assert!(system.contains("NPS FACTS for Yosemite National Park:"));
        assert_eq!(sent.max_tokens, Some(1024));
        assert!((sent.temperature - 0.7).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn caller_sampling_parameters_are_forwarded() {
        let provider = Arc::new(ScriptedProvider::always("ok"));
        let relay = claude_relay(provider.clone()).with_defaults(0.3, 2048);

        let mut req = request("claude");
        req.temperature = Some(1.1);
        req.top_p = Some(0.8);
        relay.relay(req).await.unwrap();

        let sent = provider.last_request().unwrap();
        assert!((sent.temperature - 1.1).abs() < f32::EPSILON);
        assert_eq!(sent.top_p, Some(0.8));
        assert_eq!(sent.max_tokens, Some(2048));
    }

    #[tokio::test]
    async fn ladder_skips_unavailable_models() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            (LADDER[0], Err(ProviderError::ModelNotFound(LADDER[0].into()))),
            (
                LADDER[1],
                Err(ProviderError::ApiError {
                    status_code: 404,
                    message: "not_found_error: model".into(),
                }),
            ),
            (LADDER[2], Ok("Third time lucky.")),
            (LADDER[3], Ok("never")),
        ]));
        let relay = claude_relay(provider.clone());

        let response = relay.relay(request("claude")).await.unwrap();
        assert_eq!(response.model, LADDER[2]);
        assert_eq!(provider.models_called(), LADDER[..3].to_vec());
    }

    #[tokio::test]
    async fn ladder_auth_failure_stops_at_first_model() {
        let provider = Arc::new(ScriptedProvider::new(vec![(
            LADDER[0],
            Err(ProviderError::AuthenticationFailed("invalid x-api-key".into())),
        )]));
        let relay = claude_relay(provider.clone());

        let err = relay.relay(request("claude")).await.unwrap_err();
        assert!(matches!(err, RelayError::AuthFailure(_)));
        assert_eq!(err.status_code(), 401);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn exhausted_ladder_lists_attempts() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let relay = claude_relay(provider.clone());

        match relay.relay(request("claude")).await.unwrap_err() {
            RelayError::AllModelsUnavailable {
                attempted,
                last_error,
            } => {
                assert_eq!(attempted, LADDER.to_vec());
                assert!(last_error.contains(LADDER[3]));
            }
            other => panic!("expected AllModelsUnavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn openai_uses_its_single_model() {
        let provider = Arc::new(
            ScriptedProvider::new(vec![("gpt-4o-mini", Ok("Try Angels Landing."))])
                .with_models(&["gpt-4o-mini"]),
        );
        let registry = ProviderRegistry::new().with_openai(provider.clone());
        let relay = ModelRelay::new(Arc::new(registry));

        let mut req = request("openai");
        req.model = Some("gpt-4o".into());
        let response = relay.relay(req).await.unwrap();

        assert_eq!(response.provider, ProviderKind::Openai);
        assert_eq!(response.model, "gpt-4o-mini");
        assert_eq!(provider.models_called(), vec!["gpt-4o-mini"]);
    }

    #[tokio::test]
    async fn openai_rate_limit_is_classified() {
        let provider = Arc::new(
            ScriptedProvider::new(vec![(
                "gpt-4o-mini",
                Err(ProviderError::RateLimited { retry_after_secs: 5 }),
            )])
            .with_models(&["gpt-4o-mini"]),
        );
        let registry = ProviderRegistry::new().with_openai(provider.clone());
        let relay = ModelRelay::new(Arc::new(registry));

        let err = relay.relay(request("openai")).await.unwrap_err();
        assert_eq!(err.status_code(), 429);
        assert!(err.suggestion().unwrap().contains("5 seconds"));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn openai_upstream_error_keeps_message() {
        let provider = Arc::new(
            ScriptedProvider::new(vec![(
                "gpt-4o-mini",
                Err(ProviderError::ApiError {
                    status_code: 502,
                    message: "bad gateway".into(),
                }),
            )])
            .with_models(&["gpt-4o-mini"]),
        );
        let registry = ProviderRegistry::new().with_openai(provider);
        let relay = ModelRelay::new(Arc::new(registry));

        let err = relay.relay(request("openai")).await.unwrap_err();
        assert_eq!(err.kind(), "upstream_error");
        assert!(err.to_string().contains("bad gateway"));
    }
}
