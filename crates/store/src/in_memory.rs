//! In-memory backend — useful for testing and single-process deployments.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use trailverse_core::account::{TokenUsage, UserAccount, UserStore};
use trailverse_core::error::StoreError;
use trailverse_core::session::{
    AnonymousSession, SessionMessage, SessionSeed, SessionStore, UserAppend,
};

/// Sessions and accounts held in process memory.
///
/// Every mutation happens under a single write lock, which makes appends
/// and counter increments atomic per key. Expired sessions are dropped
/// lazily on access and by [`SessionStore::purge_expired`].
#[derive(Clone, Default)]
pub struct InMemoryStore {
    sessions: Arc<RwLock<HashMap<String, AnonymousSession>>>,
    users: Arc<RwLock<HashMap<String, UserAccount>>>,
    /// bearer token -> user id
    tokens: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a session as-is (fixtures, imports).
    pub async fn insert_session(&self, session: AnonymousSession) {
        self.sessions
            .write()
            .await
            .insert(session.anonymous_id.clone(), session);
    }

    /// Insert or replace an account, optionally reachable by a bearer token.
    pub async fn insert_user(&self, user: UserAccount, token: Option<&str>) {
        if let Some(token) = token {
            self.tokens
                .write()
                .await
                .insert(token.to_string(), user.id.clone());
        }
        self.users.write().await.insert(user.id.clone(), user);
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

fn not_found(anonymous_id: &str) -> StoreError {
    StoreError::NotFound(format!("anonymous session '{anonymous_id}'"))
}

#[async_trait]
impl SessionStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn find_or_create(
        &self,
        anonymous_id: &str,
        seed: SessionSeed,
    ) -> Result<AnonymousSession, StoreError> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;

        if sessions.get(anonymous_id).is_some_and(|s| s.is_expired(now)) {
            sessions.remove(anonymous_id);
        }

        let session = sessions
            .entry(anonymous_id.to_string())
            .or_insert_with(|| AnonymousSession::new(anonymous_id, seed, now));
        Ok(session.clone())
    }

    async fn add_message(
        &self,
        anonymous_id: &str,
        message: SessionMessage,
    ) -> Result<AnonymousSession, StoreError> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(anonymous_id)
            .filter(|s| !s.is_expired(now))
            .ok_or_else(|| not_found(anonymous_id))?;
        session.push_message(message, now);
        Ok(session.clone())
    }

    async fn append_user_message(
        &self,
        anonymous_id: &str,
        message: SessionMessage,
        cap: usize,
    ) -> Result<UserAppend, StoreError> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(anonymous_id)
            .filter(|s| !s.is_expired(now))
            .ok_or_else(|| not_found(anonymous_id))?;
        if session.user_message_count() >= cap {
            return Ok(UserAppend::AtCap(session.clone()));
        }
        session.push_message(message, now);
        Ok(UserAppend::Accepted(session.clone()))
    }

    async fn get(&self, anonymous_id: &str) -> Result<Option<AnonymousSession>, StoreError> {
        let now = Utc::now();
        Ok(self
            .sessions
            .read()
            .await
            .get(anonymous_id)
            .filter(|s| !s.is_expired(now))
            .cloned())
    }

    async fn mark_converted(
        &self,
        anonymous_id: &str,
        user_id: &str,
    ) -> Result<AnonymousSession, StoreError> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(anonymous_id)
            .filter(|s| !s.is_expired(now))
            .ok_or_else(|| not_found(anonymous_id))?;
        session.mark_converted(user_id, now);
        Ok(session.clone())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(now));
        Ok(before - sessions.len())
    }
}

#[async_trait]
impl UserStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserAccount>, StoreError> {
        Ok(self.users.read().await.get(user_id).cloned())
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<UserAccount>, StoreError> {
        let user_id = self.tokens.read().await.get(token).cloned();
        match user_id {
            Some(id) => self.get_user(&id).await,
            None => Ok(None),
        }
    }

    async fn reset_daily_usage_if_stale(
        &self,
        user_id: &str,
        today: NaiveDate,
    ) -> Result<TokenUsage, StoreError> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(user_id)
            .ok_or_else(|| StoreError::NotFound(format!("user '{user_id}'")))?;
        user.token_usage = user.token_usage.as_of(today);
        Ok(user.token_usage)
    }

    async fn record_token_usage(
        &self,
        user_id: &str,
        tokens: u64,
        today: NaiveDate,
    ) -> Result<TokenUsage, StoreError> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(user_id)
            .ok_or_else(|| StoreError::NotFound(format!("user '{user_id}'")))?;
        user.token_usage = user.token_usage.add(tokens, today);
        Ok(user.token_usage)
    }
}
