//! HTTP API gateway for TrailVerse.
//!
//! Exposes the AI chat surface: anonymous and authenticated chat, session
//! status, provider listings, token usage and a health check.
//!
//! Built on Axum for high performance async HTTP.

pub mod api;

use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    extract::State,
    http::{HeaderValue, Method, StatusCode, header},
    middleware::{self, Next},
    response::Json,
    routing::{get, post},
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use trailverse_budget::{BudgetLimits, TokenBudgetGuard};
use trailverse_chat::{ChatService, ModelRelay};
use trailverse_config::AppConfig;
use trailverse_core::account::UserStore;
use trailverse_core::session::SessionStore;
use trailverse_facts::FactsAggregator;
use trailverse_providers::ProviderRegistry;
use trailverse_security::extract_bearer_token;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub chat: ChatService,
    pub users: Arc<dyn UserStore>,
    /// Honour proxy headers when resolving the client IP
    pub trust_proxy: bool,
}

pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    /// Wire every subsystem from configuration. Providers without an API
    /// key are left unregistered.
    pub fn from_config(
        config: &AppConfig,
        sessions: Arc<dyn SessionStore>,
        users: Arc<dyn UserStore>,
    ) -> Self {
        let registry = Arc::new(ProviderRegistry::from_config(&config.providers));
        Self::with_registry(config, registry, sessions, users)
    }

    /// Same as [`GatewayState::from_config`] with a prebuilt provider registry.
    pub fn with_registry(
        config: &AppConfig,
        registry: Arc<ProviderRegistry>,
        sessions: Arc<dyn SessionStore>,
        users: Arc<dyn UserStore>,
    ) -> Self {
        let relay = ModelRelay::new(registry)
            .with_defaults(config.default_temperature, config.default_max_tokens);
        let facts = Arc::new(FactsAggregator::from_config(&config.facts));
        let budget = Arc::new(TokenBudgetGuard::new(
            users.clone(),
            BudgetLimits::from_config(&config.budget),
        ));

        Self {
            chat: ChatService::new(relay, facts, sessions, budget),
            users,
            trust_proxy: config.gateway.trust_proxy,
        }
    }
}

/// Build the router with all gateway routes.
///
/// Layers applied:
/// - Bearer token authentication on the account routes
/// - CORS restricted to the configured origins
/// - Request body size limit (1 MB)
/// - HTTP trace logging
pub fn build_router(state: SharedState, allowed_origins: &[String]) -> Router {
    let authenticated = Router::new()
        .route("/api/ai/chat", post(api::chat_handler))
        .route("/api/ai/providers", get(api::providers_handler))
        .route("/api/ai/token-usage", get(api::token_usage_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/ai/chat-anonymous", post(api::chat_anonymous_handler))
        .route(
            "/api/ai/session-status/{anonymous_id}",
            get(api::session_status_handler),
        )
        .route("/api/ai/providers-anonymous", get(api::providers_handler))
        .merge(authenticated)
        .with_state(state)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors_layer(allowed_origins))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(std::time::Duration::from_secs(3600))
}

/// Start the gateway HTTP server and run until Ctrl-C.
pub async fn serve(config: &AppConfig, state: SharedState) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let app = build_router(state, &config.gateway.allowed_origins);

    info!(
        addr = %addr,
        trust_proxy = config.gateway.trust_proxy,
        "Gateway starting"
    );
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
    })
    .await?;

    Ok(())
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Authentication middleware for the account routes.
///
/// Resolves `Authorization: Bearer <token>` to a [`UserAccount`] and hands
/// it to the handler as a request extension.
///
/// [`UserAccount`]: trailverse_core::account::UserAccount
async fn auth_middleware(
    State(state): State<SharedState>,
    mut req: axum::extract::Request,
    next: Next,
) -> Result<axum::response::Response, api::ApiError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(extract_bearer_token);

    let Some(token) = token else {
        warn!(path = %req.uri().path(), "Missing bearer token");
        return Err(api::unauthorized("Authentication required"));
    };

    match state.users.find_by_token(token).await {
        Ok(Some(user)) => {
            req.extensions_mut().insert(user);
            Ok(next.run(req).await)
        }
        Ok(None) => {
            warn!(path = %req.uri().path(), "Unknown bearer token");
            Err(api::unauthorized("Invalid or expired token"))
        }
        Err(e) => {
            tracing::error!(error = %e, "User lookup failed");
            Err(api::internal_error("Authentication lookup failed", e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::Utc;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use std::sync::Mutex;
    use tower::ServiceExt;
    use trailverse_core::account::{TokenUsage, UserAccount, UserRole};
    use trailverse_core::error::ProviderError;
    use trailverse_core::message::Role;
    use trailverse_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
    use trailverse_providers::ClaudeLadder;
    use trailverse_store::InMemoryStore;

    /// Echoes the latest user turn back.
    struct EchoProvider {
        calls: Mutex<usize>,
    }

    impl EchoProvider {
        fn new() -> Self {
            Self {
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl Provider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            *self.calls.lock().unwrap() += 1;
            let last = request
                .messages
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .map(|m| m.content.clone())
                .unwrap_or_default();
            Ok(ProviderResponse {
                content: format!("echo: {last}"),
                model: request.model,
                usage: Usage {
                    input_tokens: 40,
                    output_tokens: 10,
                },
            })
        }
    }

    struct Fixture {
        app: Router,
        store: InMemoryStore,
        provider: Arc<EchoProvider>,
    }

    fn fixture_with(registry: ProviderRegistry, provider: Arc<EchoProvider>) -> Fixture {
        let store = InMemoryStore::new();
        let state = GatewayState::with_registry(
            &AppConfig::default(),
            Arc::new(registry),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
        );
        let app = build_router(Arc::new(state), &["http://localhost:3000".to_string()]);
        Fixture {
            app,
            store,
            provider,
        }
    }

    fn fixture() -> Fixture {
        let provider = Arc::new(EchoProvider::new());
        let registry = ProviderRegistry::new()
            .with_claude(ClaudeLadder::new(
                provider.clone(),
                vec!["claude-3-5-sonnet-20241022".into()],
            ))
            .with_openai(provider.clone());
        fixture_with(registry, provider)
    }

    fn unconfigured() -> Fixture {
        fixture_with(ProviderRegistry::new(), Arc::new(EchoProvider::new()))
    }

    async fn add_user(store: &InMemoryStore, token: &str, role: UserRole, daily: u64) {
        store
            .insert_user(
                UserAccount {
                    id: format!("user-{token}"),
                    email: None,
                    role,
                    token_usage: TokenUsage {
                        daily_tokens_used: daily,
                        total_tokens_used: daily,
                        last_reset_date: Utc::now().date_naive(),
                    },
                },
                Some(token),
            )
            .await;
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn chat_body(text: &str, provider: &str) -> Body {
        Body::from(
            serde_json::json!({
                "messages": [{"role": "user", "content": text}],
                "provider": provider,
                "metadata": {"parkName": "Yosemite National Park"}
            })
            .to_string(),
        )
    }

    fn anonymous_chat(text: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/ai/chat-anonymous")
            .header("content-type", "application/json")
            .header("user-agent", "Mozilla/5.0 (X11; Linux x86_64)")
            .header("accept-language", "en-US,en;q=0.9")
            .header("accept-encoding", "gzip, deflate, br")
            .body(chat_body(text, "claude"))
            .unwrap()
    }

    fn authed(method: &str, uri: &str, token: Option<&str>, body: Body) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder.body(body).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint() {
        let f = fixture();
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let (status, body) = send(&f.app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn anonymous_flow_hits_gate_on_third_message() {
        let f = fixture();

        let (status, first) = send(&f.app, anonymous_chat("Best waterfalls?")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["success"], true);
        assert_eq!(first["data"]["content"], "echo: Best waterfalls?");
        assert_eq!(first["data"]["canSendMore"], true);
        assert_eq!(first["data"]["usage"]["inputTokens"], 40);
        let anonymous_id = first["data"]["anonymousId"].as_str().unwrap().to_string();
        assert!(anonymous_id.starts_with("anon_"));

        let (_, second) = send(&f.app, anonymous_chat("Where to camp?")).await;
        assert_eq!(second["data"]["anonymousId"], anonymous_id.as_str());
        assert_eq!(second["data"]["canSendMore"], true);

        let (status, third) = send(&f.app, anonymous_chat("Any permits?")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(third["data"]["isConversionMessage"], true);
        assert_eq!(third["data"]["canSendMore"], false);
        assert!(third["data"].get("usage").is_none());
        assert_eq!(*f.provider.calls.lock().unwrap(), 2);

        let req = Request::builder()
            .uri(format!("/api/ai/session-status/{anonymous_id}"))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&f.app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["canSendMore"], false);
        assert_eq!(body["data"]["messageCount"], 5);
        assert_eq!(body["data"]["parkName"], "Yosemite National Park");
    }

    #[tokio::test]
    async fn unknown_session_status_is_404() {
        let f = fixture();
        let req = Request::builder()
            .uri("/api/ai/session-status/anon_missing")
            .body(Body::empty())
            .unwrap();

        let (status, body) = send(&f.app, req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["canSendMore"], false);
        assert_eq!(body["messageCount"], 0);
    }

    #[tokio::test]
    async fn authenticated_routes_require_a_known_token() {
        let f = fixture();
        add_user(&f.store, "good", UserRole::User, 0).await;

        let (status, body) = send(
            &f.app,
            authed("POST", "/api/ai/chat", None, chat_body("hi", "claude")),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);

        let (status, _) = send(
            &f.app,
            authed("POST", "/api/ai/chat", Some("bad"), chat_body("hi", "claude")),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = send(
            &f.app,
            authed("POST", "/api/ai/chat", Some("good"), chat_body("hi", "openai")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["content"], "echo: hi");
        assert_eq!(body["data"]["provider"], "openai");
        assert_eq!(body["data"]["usage"]["outputTokens"], 10);
    }

    #[tokio::test]
    async fn over_budget_user_gets_429_with_limit_details() {
        let f = fixture();
        add_user(&f.store, "spent", UserRole::User, 5000).await;

        let (status, body) = send(
            &f.app,
            authed("POST", "/api/ai/chat", Some("spent"), chat_body("hi", "claude")),
        )
        .await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["success"], false);
        assert_eq!(body["dailyLimit"], 5000);
        assert_eq!(body["tokensUsed"], 5000);
        assert_eq!(body["remainingTokens"], 0);
        assert!(body["resetTime"].is_string());
        assert_eq!(*f.provider.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn invalid_provider_is_400() {
        let f = fixture();
        let (status, body) = send(&f.app, {
            let mut req = anonymous_chat("hi");
            *req.body_mut() = chat_body("hi", "gemini");
            req
        })
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "invalid_provider");
        assert!(body["details"].as_str().unwrap().contains("gemini"));
        assert!(body["suggestion"].is_string());
    }

    #[tokio::test]
    async fn missing_provider_configuration_is_500() {
        let f = unconfigured();
        let (status, body) = send(&f.app, anonymous_chat("hi")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["kind"], "provider_unavailable");
        assert!(body["details"].as_str().unwrap().contains("not configured"));
    }

    #[tokio::test]
    async fn providers_listing() {
        let f = fixture();
        let req = Request::builder()
            .uri("/api/ai/providers-anonymous")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&f.app, req).await;
        assert_eq!(status, StatusCode::OK);
        let providers = body["data"]["providers"].as_array().unwrap();
        assert_eq!(providers.len(), 2);
        assert_eq!(providers[0]["id"], "claude");
        assert_eq!(providers[0]["available"], true);

        let empty = unconfigured();
        let req = Request::builder()
            .uri("/api/ai/providers-anonymous")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&empty.app, req).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["data"]["providers"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn token_usage_report() {
        let f = fixture();
        add_user(&f.store, "tok", UserRole::User, 1200).await;

        let (status, body) = send(
            &f.app,
            authed("GET", "/api/ai/token-usage", Some("tok"), Body::empty()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["dailyLimit"], 5000);
        assert_eq!(body["data"]["dailyTokensUsed"], 1200);
        assert_eq!(body["data"]["remainingTokens"], 3800);
        assert!(body["data"]["lastResetDate"].is_string());
    }

    #[tokio::test]
    async fn admin_usage_report_is_unlimited() {
        let f = fixture();
        add_user(&f.store, "root", UserRole::Admin, 90_000).await;

        let (_, body) = send(
            &f.app,
            authed("GET", "/api/ai/token-usage", Some("root"), Body::empty()),
        )
        .await;
        assert!(body["data"]["dailyLimit"].is_null());
        assert!(body["data"]["remainingTokens"].is_null());
    }
}
