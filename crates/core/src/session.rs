//! Anonymous session model and the store trait that persists it.
//!
//! A session is keyed by the fingerprint-derived anonymous ID. It holds an
//! append-only message log and gates how many user-authored turns may be
//! answered before the visitor has to sign up.

use crate::error::StoreError;
use crate::message::Role;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Number of user-authored messages an anonymous session may hold.
pub const MAX_ANONYMOUS_USER_MESSAGES: usize = 3;

/// Rolling inactivity window after which a session disappears.
pub const SESSION_TTL_HOURS: i64 = 48;

/// One entry in a session's message log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Wall-clock relay latency for assistant turns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
}

impl SessionMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            provider: None,
            model: None,
            response_time_ms: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Attach relay provenance to an assistant turn.
    pub fn with_relay_metadata(
        mut self,
        provider: impl Into<String>,
        model: impl Into<String>,
        response_time_ms: u64,
    ) -> Self {
        self.provider = Some(provider.into());
        self.model = Some(model.into());
        self.response_time_ms = Some(response_time_ms);
        self
    }
}

/// Capture-time provenance and trip context persisted on session creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSeed {
    pub ip_address: String,
    pub user_agent: String,
    pub browser_fingerprint: String,
    #[serde(default)]
    pub park_name: Option<String>,
    #[serde(default)]
    pub park_code: Option<String>,
    #[serde(default)]
    pub form_data: Option<serde_json::Value>,
}

/// A bounded, time-limited anonymous conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnonymousSession {
    pub anonymous_id: String,
    pub ip_address: String,
    pub user_agent: String,
    pub browser_fingerprint: String,
    pub messages: Vec<SessionMessage>,
    pub park_name: Option<String>,
    pub park_code: Option<String>,
    pub form_data: Option<serde_json::Value>,
    /// Cached `messages.len()`
    pub message_count: usize,
    pub last_activity: DateTime<Utc>,
    pub is_converted: bool,
    pub converted_user_id: Option<String>,
    pub converted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl AnonymousSession {
    pub fn new(anonymous_id: impl Into<String>, seed: SessionSeed, now: DateTime<Utc>) -> Self {
        Self {
            anonymous_id: anonymous_id.into(),
            ip_address: seed.ip_address,
            user_agent: seed.user_agent,
            browser_fingerprint: seed.browser_fingerprint,
            messages: Vec::new(),
            park_name: seed.park_name,
            park_code: seed.park_code,
            form_data: seed.form_data,
            message_count: 0,
            last_activity: now,
            is_converted: false,
            converted_user_id: None,
            converted_at: None,
            created_at: now,
        }
    }

    /// Number of user-authored entries in the log.
    pub fn user_message_count(&self) -> usize {
        self.messages.iter().filter(|m| m.role == Role::User).count()
    }

    /// True while fewer than three user messages are stored.
    pub fn can_send_message(&self) -> bool {
        self.user_message_count() < MAX_ANONYMOUS_USER_MESSAGES
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.last_activity + Duration::hours(SESSION_TTL_HOURS)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at() <= now
    }

    /// Append a message, refresh the cached count and bump activity.
    pub fn push_message(&mut self, message: SessionMessage, now: DateTime<Utc>) {
        self.messages.push(message);
        self.message_count = self.messages.len();
        self.last_activity = now;
    }

    /// Link this session to a real account. Returns `false` if it already was.
    pub fn mark_converted(&mut self, user_id: impl Into<String>, now: DateTime<Utc>) -> bool {
        if self.is_converted {
            return false;
        }
        self.is_converted = true;
        self.converted_user_id = Some(user_id.into());
        self.converted_at = Some(now);
        true
    }
}

/// Outcome of [`SessionStore::append_user_message`].
#[derive(Debug, Clone)]
pub enum UserAppend {
    /// The message was stored; carries the updated session.
    Accepted(AnonymousSession),
    /// The session already held `cap` user messages; nothing was stored.
    AtCap(AnonymousSession),
}

/// Persistence for anonymous sessions.
///
/// Implementations must make `add_message` atomic per session so that
/// concurrent requests from one identity never lose an append, and must
/// evaluate the cap in `append_user_message` in the same atomic step as
/// the write.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Backend name for diagnostics.
    fn name(&self) -> &str;

    /// Return the live session for `anonymous_id`, creating it from `seed`
    /// if absent. Only the first call's seed is persisted.
    async fn find_or_create(
        &self,
        anonymous_id: &str,
        seed: SessionSeed,
    ) -> Result<AnonymousSession, StoreError>;

    /// Append a message and return the updated session.
    async fn add_message(
        &self,
        anonymous_id: &str,
        message: SessionMessage,
    ) -> Result<AnonymousSession, StoreError>;

    /// Append a user-authored message only while the session holds fewer
    /// than `cap` user messages.
    async fn append_user_message(
        &self,
        anonymous_id: &str,
        message: SessionMessage,
        cap: usize,
    ) -> Result<UserAppend, StoreError>;

    /// Look up a live (unexpired) session.
    async fn get(&self, anonymous_id: &str) -> Result<Option<AnonymousSession>, StoreError>;

    /// Set the conversion fields once; later calls leave them untouched.
    async fn mark_converted(
        &self,
        anonymous_id: &str,
        user_id: &str,
    ) -> Result<AnonymousSession, StoreError>;

    /// Delete every session idle for longer than the TTL. Returns the count.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> AnonymousSession {
        AnonymousSession::new("anon_test", SessionSeed::default(), Utc::now())
    }

    #[test]
    fn gate_allows_first_three_user_messages_only() {
        let mut s = session();
        let now = Utc::now();
        for expected in [true, true, true] {
            assert_eq!(s.can_send_message(), expected);
            s.push_message(SessionMessage::user("q"), now);
            s.push_message(SessionMessage::assistant("a"), now);
        }
        assert!(!s.can_send_message());
        // Re-checking without new messages does not change the answer.
        assert!(!s.can_send_message());
        assert_eq!(s.user_message_count(), 3);
        assert_eq!(s.message_count, 6);
    }

    #[test]
    fn assistant_messages_do_not_count_toward_gate() {
        let mut s = session();
        for _ in 0..10 {
            s.push_message(SessionMessage::assistant("a"), Utc::now());
        }
        assert!(s.can_send_message());
    }

    #[test]
    fn expiry_is_rolling_from_last_activity() {
        let mut s = session();
        let start = Utc::now() - Duration::hours(47);
        s.last_activity = start;
        assert!(!s.is_expired(Utc::now()));
        assert!(s.is_expired(start + Duration::hours(48) + Duration::seconds(1)));

        s.push_message(SessionMessage::user("still here"), start + Duration::hours(40));
        assert!(!s.is_expired(start + Duration::hours(48) + Duration::seconds(1)));
    }

    #[test]
    fn conversion_is_set_once() {
        let mut s = session();
        let first = Utc::now();
        assert!(s.mark_converted("user-1", first));
        assert!(!s.mark_converted("user-2", first + Duration::minutes(5)));
        assert_eq!(s.converted_user_id.as_deref(), Some("user-1"));
        assert_eq!(s.converted_at, Some(first));
    }

    #[test]
    fn relay_metadata_is_attached() {
        let m = SessionMessage::assistant("hello").with_relay_metadata("claude", "claude-x", 812);
        assert_eq!(m.provider.as_deref(), Some("claude"));
        assert_eq!(m.response_time_ms, Some(812));
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["responseTimeMs"], 812);
    }
}
