//! AI chat API handlers.
//!
//! Endpoints:
//!
//! - `POST /api/ai/chat`                        — Authenticated chat (token budget applies)
//! - `POST /api/ai/chat-anonymous`              — Anonymous chat, 3 user messages per session
//! - `GET  /api/ai/session-status/{anonymous_id}` — Anonymous session gate state
//! - `GET  /api/ai/providers`                   — Configured providers (authenticated)
//! - `GET  /api/ai/providers-anonymous`         — Configured providers
//! - `GET  /api/ai/token-usage`                 — Caller's daily token usage

use axum::{
    Extension,
    extract::{ConnectInfo, FromRequestParts, Path, State},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use tracing::{error, info, warn};

use crate::SharedState;
use trailverse_budget::{LimitExceeded, UsageReport};
use trailverse_chat::{
    AnonymousChatResponse, ChatError, ChatReply, ChatRequest, RelayError, SessionStatus,
};
use trailverse_core::account::UserAccount;
use trailverse_providers::ProviderAvailability;
use trailverse_security::{AnonymousIdentity, RequestMetadata, derive_identity};

// ── Response envelopes ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempted_models: Option<Vec<String>>,
    /// `dailyLimit`, `tokensUsed`, `remainingTokens`, `resetTime` on a 429
    #[serde(flatten)]
    pub limit: Option<LimitExceeded>,
}

impl ErrorResponse {
    fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            kind: None,
            details: None,
            suggestion: None,
            attempted_models: None,
            limit: None,
        }
    }
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub(crate) fn unauthorized(error: &str) -> ApiError {
    (StatusCode::UNAUTHORIZED, Json(ErrorResponse::new(error)))
}

pub(crate) fn internal_error(error: &str, details: String) -> ApiError {
    let mut body = ErrorResponse::new(error);
    body.details = Some(details);
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body))
}

/// Map a pipeline failure to its HTTP status and JSON body.
fn chat_error(err: ChatError) -> ApiError {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let body = match err {
        ChatError::Relay(relay) => {
            let mut body = ErrorResponse::new(relay.title());
            body.kind = Some(relay.kind());
            body.details = Some(relay.to_string());
            body.suggestion = relay.suggestion();
            if let RelayError::AllModelsUnavailable { attempted, .. } = relay {
                body.attempted_models = Some(attempted);
            }
            body
        }
        ChatError::LimitExceeded(limit) => {
            let mut body = ErrorResponse::new("Daily token limit exceeded");
            body.kind = Some("token_limit_exceeded");
            body.details = Some(format!(
                "You have used {} of your {} daily tokens.",
                limit.tokens_used, limit.daily_limit
            ));
            body.suggestion = Some("Your limit resets at midnight UTC.".into());
            body.limit = Some(limit);
            body
        }
        ChatError::Store(e) => {
            error!(error = %e, "Session store failure");
            let mut body = ErrorResponse::new("Failed to save chat session");
            body.kind = Some("store_error");
            body.details = Some(e.to_string());
            body
        }
        ChatError::InvalidRequest(message) => {
            let mut body = ErrorResponse::new("Invalid request");
            body.kind = Some("invalid_request");
            body.details = Some(message);
            body
        }
    };

    if status.is_server_error() {
        error!(status = status.as_u16(), error = %body.error, "Chat request failed");
    } else {
        warn!(status = status.as_u16(), error = %body.error, "Chat request rejected");
    }

    (status, Json(body))
}

// ── Extractors ────────────────────────────────────────────────────────────

/// The caller's fingerprint-derived anonymous identity.
pub struct ClientIdentity(pub AnonymousIdentity);

impl FromRequestParts<SharedState> for ClientIdentity {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let remote_addr = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        let headers = parts.headers.iter().filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str(), v.to_string()))
        });

        let meta = RequestMetadata::new(remote_addr, headers, state.trust_proxy);
        Ok(Self(derive_identity(&meta)))
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────

pub async fn chat_handler(
    State(state): State<SharedState>,
    Extension(user): Extension<UserAccount>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ApiResponse<ChatReply>>, ApiError> {
    info!(
        user_id = %user.id,
        provider = %request.provider,
        messages = request.messages.len(),
        "Chat request"
    );

    let reply = state.chat.chat(&user, request).await.map_err(chat_error)?;
    Ok(ApiResponse::ok(reply))
}

pub async fn chat_anonymous_handler(
    State(state): State<SharedState>,
    ClientIdentity(identity): ClientIdentity,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ApiResponse<AnonymousChatResponse>>, ApiError> {
    info!(
        anonymous_id = %identity.anonymous_id,
        provider = %request.provider,
        messages = request.messages.len(),
        "Anonymous chat request"
    );

    let response = state
        .chat
        .chat_anonymous(&identity, request)
        .await
        .map_err(chat_error)?;
    Ok(ApiResponse::ok(response))
}

/// Returned with a 404 for unknown or expired sessions.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MissingSession {
    success: bool,
    error: &'static str,
    can_send_more: bool,
    message_count: usize,
}

pub async fn session_status_handler(
    State(state): State<SharedState>,
    Path(anonymous_id): Path<String>,
) -> Response {
    match state.chat.session_status(&anonymous_id).await {
        Ok(Some(status)) => ApiResponse::<SessionStatus>::ok(status).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(MissingSession {
                success: false,
                error: "Session not found",
                can_send_more: false,
                message_count: 0,
            }),
        )
            .into_response(),
        Err(e) => chat_error(e).into_response(),
    }
}

#[derive(Debug, Serialize)]
pub struct ProvidersData {
    pub providers: Vec<ProviderAvailability>,
}

#[derive(Debug, Serialize)]
pub struct ProvidersResponse {
    pub success: bool,
    pub data: ProvidersData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
}

pub async fn providers_handler(
    State(state): State<SharedState>,
) -> (StatusCode, Json<ProvidersResponse>) {
    let providers = state.chat.providers();

    if providers.is_empty() {
        warn!("No AI providers configured");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ProvidersResponse {
                success: false,
                data: ProvidersData { providers },
                error: Some("No AI providers are configured"),
            }),
        );
    }

    (
        StatusCode::OK,
        Json(ProvidersResponse {
            success: true,
            data: ProvidersData { providers },
            error: None,
        }),
    )
}

pub async fn token_usage_handler(
    State(state): State<SharedState>,
    Extension(user): Extension<UserAccount>,
) -> Result<Json<ApiResponse<UsageReport>>, ApiError> {
    let report = state.chat.usage_report(&user).await.map_err(chat_error)?;
    Ok(ApiResponse::ok(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use trailverse_core::error::StoreError;

    #[test]
    fn exhausted_ladder_lists_attempted_models() {
        let (status, Json(body)) = chat_error(ChatError::Relay(
            RelayError::AllModelsUnavailable {
                attempted: vec!["claude-a".into(), "claude-b".into()],
                last_error: "model not found".into(),
            },
        ));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let json = serde_json::to_value(body).unwrap();
        assert_eq!(json["kind"], "all_models_unavailable");
        assert_eq!(json["attemptedModels"][1], "claude-b");
        assert!(json["details"].as_str().unwrap().contains("model not found"));
    }

    #[test]
    fn store_failure_is_500_without_limit_fields() {
        let (status, Json(body)) =
            chat_error(ChatError::Store(StoreError::Storage("disk full".into())));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let json = serde_json::to_value(body).unwrap();
        assert_eq!(json["success"], false);
        assert!(json.get("dailyLimit").is_none());
        assert!(json.get("attemptedModels").is_none());
    }

    #[test]
    fn upstream_rate_limit_keeps_suggestion() {
        let (status, Json(body)) = chat_error(ChatError::Relay(RelayError::RateLimited {
            message: "rate limited".into(),
            retry_after_secs: Some(30),
        }));
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            body.suggestion.as_deref(),
            Some("Please wait 30 seconds and try again.")
        );
    }
}
