//! The per-request chat pipeline for both the anonymous and the
//! authenticated path.
//!
//! Anonymous path:
//!
//! ```text
//! IDENTIFIED -> SESSION_LOADED -> GATE_CHECKED -+-> FACTS_GATHERED -> RELAYED -> RECORDED
//!                                               +-> CONVERSION_REQUIRED
//! ```
//!
//! The gate is checked twice: before the incoming user turn is stored (a
//! session already at the cap stores nothing more) and again after it is
//! stored (the turn that reaches the cap is kept but not answered).

use crate::error::ChatError;
use crate::prompt::last_user_message;
use crate::relay::{ModelRelay, RelayRequest, RelayResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use trailverse_budget::{TokenBudgetGuard, UsageReport};
use trailverse_core::account::UserAccount;
use trailverse_core::facts::{FactsBundle, FactsQuery};
use trailverse_core::message::Message;
use trailverse_core::provider::Usage;
use trailverse_core::session::{
    AnonymousSession, MAX_ANONYMOUS_USER_MESSAGES, SessionMessage, SessionSeed, SessionStore,
    UserAppend,
};
use trailverse_facts::FactsAggregator;
use trailverse_providers::ProviderAvailability;
use trailverse_security::AnonymousIdentity;

/// Returned in place of an AI answer once the anonymous cap is reached.
pub const CONVERSION_MESSAGE: &str = "You've used all 3 free messages for this trip-planning \
chat. To keep planning, create a free TrailVerse account: it only takes a minute, and your \
conversation so far will come with you. Otherwise, your free messages reset 48 hours after your \
last message.";

fn default_provider() -> String {
    "claude".into()
}

/// Body of `POST /api/ai/chat` and `POST /api/ai/chat-anonymous`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default, rename = "top_p", alias = "topP")]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub metadata: ChatMetadata,
}

/// Trip context attached to a chat request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMetadata {
    #[serde(default)]
    pub park_code: Option<String>,
    #[serde(default)]
    pub park_name: Option<String>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    #[serde(default)]
    pub form_data: Option<serde_json::Value>,
}

/// An answered chat turn, identical in shape for both providers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub content: String,
    pub provider: String,
    pub model: String,
    pub usage: Usage,
}

impl From<RelayResponse> for ChatReply {
    fn from(r: RelayResponse) -> Self {
        Self {
            content: r.content,
            provider: r.provider.id().to_string(),
            model: r.model,
            usage: r.usage,
        }
    }
}

/// Response payload of the anonymous chat route.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnonymousChatResponse {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    pub anonymous_id: String,
    pub message_count: usize,
    pub can_send_more: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_conversion_message: bool,
}

impl AnonymousChatResponse {
    fn conversion(session: &AnonymousSession) -> Self {
        Self {
            content: CONVERSION_MESSAGE.into(),
            provider: None,
            model: None,
            usage: None,
            anonymous_id: session.anonymous_id.clone(),
            message_count: session.message_count,
            can_send_more: false,
            is_conversion_message: true,
        }
    }
}

/// Response payload of the session-status route.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub can_send_more: bool,
    pub message_count: usize,
    pub is_converted: bool,
    pub last_activity: DateTime<Utc>,
    pub park_name: Option<String>,
}

impl From<&AnonymousSession> for SessionStatus {
    fn from(session: &AnonymousSession) -> Self {
        Self {
            can_send_more: session.can_send_message(),
            message_count: session.message_count,
            is_converted: session.is_converted,
            last_activity: session.last_activity,
            park_name: session.park_name.clone(),
        }
    }
}

pub struct ChatService {
    relay: ModelRelay,
    facts: Arc<FactsAggregator>,
    sessions: Arc<dyn SessionStore>,
    budget: Arc<TokenBudgetGuard>,
}

impl ChatService {
    pub fn new(
        relay: ModelRelay,
        facts: Arc<FactsAggregator>,
        sessions: Arc<dyn SessionStore>,
        budget: Arc<TokenBudgetGuard>,
    ) -> Self {
        Self {
            relay,
            facts,
            sessions,
            budget,
        }
    }

    /// Configured providers, Claude first.
    pub fn providers(&self) -> Vec<ProviderAvailability> {
        self.relay.registry().availability()
    }

    pub async fn usage_report(&self, user: &UserAccount) -> Result<UsageReport, ChatError> {
        Ok(self.budget.usage_report(&user.id).await?)
    }

    /// Authenticated chat: budget pre-check, facts, relay, background
    /// usage recording.
    pub async fn chat(
        &self,
        user: &UserAccount,
        request: ChatRequest,
    ) -> Result<ChatReply, ChatError> {
        let user_text = last_user_message(&request.messages)
            .ok_or_else(|| ChatError::InvalidRequest("messages must include a user message".into()))?
            .to_string();

        self.budget.assert_within_daily_limit(user).await?;

        let facts = self.gather_facts(&user_text, &request.metadata).await;
        let response = self.relay.relay(relay_request(request, facts)).await?;

        // The reply goes out without waiting on the counter write.
        self.budget.spawn_record(user, response.usage);

        Ok(response.into())
    }

    /// Anonymous chat, gated at three user messages per session.
    pub async fn chat_anonymous(
        &self,
        identity: &AnonymousIdentity,
        request: ChatRequest,
    ) -> Result<AnonymousChatResponse, ChatError> {
        let user_text = last_user_message(&request.messages)
            .ok_or_else(|| ChatError::InvalidRequest("messages must include a user message".into()))?
            .to_string();
        let anonymous_id = identity.anonymous_id.as_str();

        let seed = SessionSeed {
            ip_address: identity.ip_address.clone(),
            user_agent: identity.user_agent.clone(),
            browser_fingerprint: identity.browser_fingerprint.clone(),
            park_name: request.metadata.park_name.clone(),
            park_code: request.metadata.park_code.clone(),
            form_data: request.metadata.form_data.clone(),
        };
        let session = self.sessions.find_or_create(anonymous_id, seed).await?;

        if !session.can_send_message() {
            info!(anonymous_id, "Anonymous session already at message cap");
            return Ok(AnonymousChatResponse::conversion(&session));
        }

        let session = match self
            .sessions
            .append_user_message(
                anonymous_id,
                SessionMessage::user(user_text.as_str()),
                MAX_ANONYMOUS_USER_MESSAGES,
            )
            .await?
        {
            UserAppend::Accepted(session) => session,
            UserAppend::AtCap(session) => {
                info!(anonymous_id, "Concurrent request filled the session first");
                return Ok(AnonymousChatResponse::conversion(&session));
            }
        };

        if !session.can_send_message() {
            info!(
                anonymous_id,
                user_messages = session.user_message_count(),
                "Anonymous message cap reached, conversion required"
            );
            return Ok(AnonymousChatResponse::conversion(&session));
        }

        let facts = self.gather_facts(&user_text, &request.metadata).await;
        let started = Instant::now();
        let response = self.relay.relay(relay_request(request, facts)).await?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let assistant = SessionMessage::assistant(response.content.as_str()).with_relay_metadata(
            response.provider.id(),
            response.model.as_str(),
            elapsed_ms,
        );
        let session = self.sessions.add_message(anonymous_id, assistant).await?;

        debug!(
            anonymous_id,
            message_count = session.message_count,
            elapsed_ms,
            "Anonymous turn answered"
        );

        Ok(AnonymousChatResponse {
            content: response.content,
            provider: Some(response.provider.id().to_string()),
            model: Some(response.model),
            usage: Some(response.usage),
            anonymous_id: session.anonymous_id.clone(),
            message_count: session.message_count,
            can_send_more: session.can_send_message(),
            is_conversion_message: false,
        })
    }

    /// `None` for unknown or expired sessions.
    pub async fn session_status(&self, anonymous_id: &str) -> Result<Option<SessionStatus>, ChatError> {
        Ok(self
            .sessions
            .get(anonymous_id)
            .await?
            .as_ref()
            .map(SessionStatus::from))
    }

    async fn gather_facts(&self, user_text: &str, metadata: &ChatMetadata) -> FactsBundle {
        self.facts
            .fetch_relevant_facts(&FactsQuery {
                user_message: user_text.to_string(),
                park_code: metadata.park_code.clone(),
                park_name: metadata.park_name.clone(),
                lat: metadata.lat,
                lon: metadata.lon,
            })
            .await
    }
}

fn relay_request(request: ChatRequest, facts: FactsBundle) -> RelayRequest {
    RelayRequest {
        provider: request.provider,
        model: request.model,
        messages: request.messages,
        system_prompt: request.system_prompt,
        temperature: request.temperature,
        max_tokens: request.max_tokens,
        top_p: request.top_p,
        park_name: request.metadata.park_name,
        facts,
    }
}
