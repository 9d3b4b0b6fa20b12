//! SQLite backend.
//!
//! Three tables:
//! - `anonymous_sessions` — one row per anonymous ID, indexed on `expires_at`
//! - `session_messages` — the append-only message log
//! - `users` — account role, bearer token and token counters
//!
//! Timestamps are stored as RFC 3339 UTC strings with millisecond precision
//! so that string comparison orders them correctly.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};
use trailverse_core::account::{TokenUsage, UserAccount, UserRole, UserStore};
use trailverse_core::error::StoreError;
use trailverse_core::message::Role;
use trailverse_core::session::{
    AnonymousSession, SessionMessage, SessionSeed, SessionStore, UserAppend, SESSION_TTL_HOURS,
};

pub struct SqliteStore {
    pool: SqlitePool,
}

fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::QueryFailed(format!("bad timestamp '{s}': {e}")))
}

fn expiry(last_activity: DateTime<Utc>) -> DateTime<Utc> {
    last_activity + chrono::Duration::hours(SESSION_TTL_HOURS)
}

fn query_failed(context: &str) -> impl FnOnce(sqlx::Error) -> StoreError + '_ {
    move |e| StoreError::QueryFailed(format!("{context}: {e}"))
}

impl SqliteStore {
    /// Open (or create) a database.
    ///
    /// Pass `"sqlite::memory:"` for an ephemeral database; it is served
    /// through a single connection so every query sees the same data.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let in_memory = path.contains(":memory:");
        let mut options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 4 })
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS anonymous_sessions (
                anonymous_id        TEXT PRIMARY KEY,
                ip_address          TEXT NOT NULL,
                user_agent          TEXT NOT NULL,
                browser_fingerprint TEXT NOT NULL,
                park_name           TEXT,
                park_code           TEXT,
                form_data           TEXT,
                message_count       INTEGER NOT NULL DEFAULT 0,
                last_activity       TEXT NOT NULL,
                expires_at          TEXT NOT NULL,
                is_converted        INTEGER NOT NULL DEFAULT 0,
                converted_user_id   TEXT,
                converted_at        TEXT,
                created_at          TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("anonymous_sessions table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sessions_expires_at ON anonymous_sessions(expires_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("expires_at index: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS session_messages (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                anonymous_id     TEXT NOT NULL
                                 REFERENCES anonymous_sessions(anonymous_id) ON DELETE CASCADE,
                role             TEXT NOT NULL,
                content          TEXT NOT NULL,
                timestamp        TEXT NOT NULL,
                provider         TEXT,
                model            TEXT,
                response_time_ms INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("session_messages table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_session ON session_messages(anonymous_id, id)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("messages index: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id                TEXT PRIMARY KEY,
                email             TEXT,
                role              TEXT NOT NULL DEFAULT 'user',
                api_token         TEXT UNIQUE,
                daily_tokens_used INTEGER NOT NULL DEFAULT 0,
                total_tokens_used INTEGER NOT NULL DEFAULT 0,
                last_reset_date   TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("users table: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    /// Insert or replace an account. Accounts are normally provisioned by
    /// the wider application; this exists for seeding and tests.
    pub async fn upsert_user(&self, user: &UserAccount, token: Option<&str>) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, role, api_token, daily_tokens_used, total_tokens_used, last_reset_date)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                email = excluded.email,
                role = excluded.role,
                api_token = excluded.api_token,
                daily_tokens_used = excluded.daily_tokens_used,
                total_tokens_used = excluded.total_tokens_used,
                last_reset_date = excluded.last_reset_date
            "#,
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(user.role.as_str())
        .bind(token)
        .bind(user.token_usage.daily_tokens_used as i64)
        .bind(user.token_usage.total_tokens_used as i64)
        .bind(user.token_usage.last_reset_date.to_string())
        .execute(&self.pool)
        .await
        .map_err(query_failed("upsert user"))?;
        Ok(())
    }

    /// Load a live session with its messages.
    async fn load_session(
        &self,
        anonymous_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AnonymousSession>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM anonymous_sessions WHERE anonymous_id = ? AND expires_at > ?",
        )
        .bind(anonymous_id)
        .bind(ts(now))
        .fetch_optional(&self.pool)
        .await
        .map_err(query_failed("load session"))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let message_rows = sqlx::query(
            "SELECT role, content, timestamp, provider, model, response_time_ms
             FROM session_messages WHERE anonymous_id = ? ORDER BY id ASC",
        )
        .bind(anonymous_id)
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed("load messages"))?;

        let messages = message_rows
            .iter()
            .map(Self::row_to_message)
            .collect::<Result<Vec<_>, _>>()?;

        Self::row_to_session(&row, messages).map(Some)
    }

    fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<SessionMessage, StoreError> {
        let role: String = row.try_get("role").map_err(query_failed("role column"))?;
        let timestamp: String = row
            .try_get("timestamp")
            .map_err(query_failed("timestamp column"))?;
        let response_time_ms: Option<i64> = row
            .try_get("response_time_ms")
            .map_err(query_failed("response_time_ms column"))?;

        Ok(SessionMessage {
            role: Role::from_str(&role).map_err(StoreError::QueryFailed)?,
            content: row.try_get("content").map_err(query_failed("content column"))?,
            timestamp: parse_ts(&timestamp)?,
            provider: row.try_get("provider").map_err(query_failed("provider column"))?,
            model: row.try_get("model").map_err(query_failed("model column"))?,
            response_time_ms: response_time_ms.map(|v| v.max(0) as u64),
        })
    }

    fn row_to_session(
        row: &sqlx::sqlite::SqliteRow,
        messages: Vec<SessionMessage>,
    ) -> Result<AnonymousSession, StoreError> {
        let form_data: Option<String> = row
            .try_get("form_data")
            .map_err(query_failed("form_data column"))?;
        let message_count: i64 = row
            .try_get("message_count")
            .map_err(query_failed("message_count column"))?;
        let last_activity: String = row
            .try_get("last_activity")
            .map_err(query_failed("last_activity column"))?;
        let is_converted: i64 = row
            .try_get("is_converted")
            .map_err(query_failed("is_converted column"))?;
        let converted_at: Option<String> = row
            .try_get("converted_at")
            .map_err(query_failed("converted_at column"))?;
        let created_at: String = row
            .try_get("created_at")
            .map_err(query_failed("created_at column"))?;

        Ok(AnonymousSession {
            anonymous_id: row
                .try_get("anonymous_id")
                .map_err(query_failed("anonymous_id column"))?,
            ip_address: row
                .try_get("ip_address")
                .map_err(query_failed("ip_address column"))?,
            user_agent: row
                .try_get("user_agent")
                .map_err(query_failed("user_agent column"))?,
            browser_fingerprint: row
                .try_get("browser_fingerprint")
                .map_err(query_failed("browser_fingerprint column"))?,
            messages,
            park_name: row.try_get("park_name").map_err(query_failed("park_name column"))?,
            park_code: row.try_get("park_code").map_err(query_failed("park_code column"))?,
            form_data: form_data.and_then(|s| serde_json::from_str(&s).ok()),
            message_count: message_count.max(0) as usize,
            last_activity: parse_ts(&last_activity)?,
            is_converted: is_converted != 0,
            converted_user_id: row
                .try_get("converted_user_id")
                .map_err(query_failed("converted_user_id column"))?,
            converted_at: converted_at.as_deref().map(parse_ts).transpose()?,
            created_at: parse_ts(&created_at)?,
        })
    }

    fn row_to_user(row: &sqlx::sqlite::SqliteRow) -> Result<UserAccount, StoreError> {
        let role: String = row.try_get("role").map_err(query_failed("role column"))?;
        let daily: i64 = row
            .try_get("daily_tokens_used")
            .map_err(query_failed("daily_tokens_used column"))?;
        let total: i64 = row
            .try_get("total_tokens_used")
            .map_err(query_failed("total_tokens_used column"))?;
        let last_reset: String = row
            .try_get("last_reset_date")
            .map_err(query_failed("last_reset_date column"))?;

        Ok(UserAccount {
            id: row.try_get("id").map_err(query_failed("id column"))?,
            email: row.try_get("email").map_err(query_failed("email column"))?,
            role: UserRole::from_str(&role).map_err(StoreError::QueryFailed)?,
            token_usage: TokenUsage {
                daily_tokens_used: daily.max(0) as u64,
                total_tokens_used: total.max(0) as u64,
                last_reset_date: NaiveDate::from_str(&last_reset)
                    .map_err(|e| StoreError::QueryFailed(format!("bad date '{last_reset}': {e}")))?,
            },
        })
    }

    async fn usage_after_update(&self, user_id: &str) -> Result<TokenUsage, StoreError> {
        self.get_user(user_id)
            .await?
            .map(|u| u.token_usage)
            .ok_or_else(|| StoreError::NotFound(format!("user '{user_id}'")))
    }
}

fn not_found(anonymous_id: &str) -> StoreError {
    StoreError::NotFound(format!("anonymous session '{anonymous_id}'"))
}

#[async_trait]
impl SessionStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn find_or_create(
        &self,
        anonymous_id: &str,
        seed: SessionSeed,
    ) -> Result<AnonymousSession, StoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(query_failed("begin"))?;

        // An expired row is gone as far as callers are concerned.
        sqlx::query("DELETE FROM session_messages WHERE anonymous_id = ? AND EXISTS (SELECT 1 FROM anonymous_sessions WHERE anonymous_id = ? AND expires_at <= ?)")
            .bind(anonymous_id)
            .bind(anonymous_id)
            .bind(ts(now))
            .execute(&mut *tx)
            .await
            .map_err(query_failed("drop expired messages"))?;
        sqlx::query("DELETE FROM anonymous_sessions WHERE anonymous_id = ? AND expires_at <= ?")
            .bind(anonymous_id)
            .bind(ts(now))
            .execute(&mut *tx)
            .await
            .map_err(query_failed("drop expired session"))?;

        let form_data = seed
            .form_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Storage(format!("form_data: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO anonymous_sessions
                (anonymous_id, ip_address, user_agent, browser_fingerprint, park_name, park_code,
                 form_data, message_count, last_activity, expires_at, is_converted, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?, 0, ?)
            ON CONFLICT(anonymous_id) DO NOTHING
            "#,
        )
        .bind(anonymous_id)
        .bind(&seed.ip_address)
        .bind(&seed.user_agent)
        .bind(&seed.browser_fingerprint)
        .bind(&seed.park_name)
        .bind(&seed.park_code)
        .bind(form_data)
        .bind(ts(now))
        .bind(ts(expiry(now)))
        .bind(ts(now))
        .execute(&mut *tx)
        .await
        .map_err(query_failed("insert session"))?;

        tx.commit().await.map_err(query_failed("commit"))?;

        self.load_session(anonymous_id, now)
            .await?
            .ok_or_else(|| not_found(anonymous_id))
    }

    async fn add_message(
        &self,
        anonymous_id: &str,
        message: SessionMessage,
    ) -> Result<AnonymousSession, StoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(query_failed("begin"))?;

        let updated = sqlx::query(
            r#"
            UPDATE anonymous_sessions
            SET message_count = message_count + 1, last_activity = ?, expires_at = ?
            WHERE anonymous_id = ? AND expires_at > ?
            "#,
        )
        .bind(ts(now))
        .bind(ts(expiry(now)))
        .bind(anonymous_id)
        .bind(ts(now))
        .execute(&mut *tx)
        .await
        .map_err(query_failed("bump session"))?;

        if updated.rows_affected() == 0 {
            return Err(not_found(anonymous_id));
        }

        sqlx::query(
            r#"
            INSERT INTO session_messages
                (anonymous_id, role, content, timestamp, provider, model, response_time_ms)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(anonymous_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(ts(message.timestamp))
        .bind(&message.provider)
        .bind(&message.model)
        .bind(message.response_time_ms.map(|v| v as i64))
        .execute(&mut *tx)
        .await
        .map_err(query_failed("insert message"))?;

        tx.commit().await.map_err(query_failed("commit"))?;

        self.load_session(anonymous_id, now)
            .await?
            .ok_or_else(|| not_found(anonymous_id))
    }

    async fn append_user_message(
        &self,
        anonymous_id: &str,
        message: SessionMessage,
        cap: usize,
    ) -> Result<UserAppend, StoreError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(query_failed("begin"))?;

        // Count check and insert run as one statement under the write lock.
        let inserted = sqlx::query(
            r#"
            INSERT INTO session_messages
                (anonymous_id, role, content, timestamp, provider, model, response_time_ms)
            SELECT ?, ?, ?, ?, ?, ?, ?
            WHERE EXISTS (
                SELECT 1 FROM anonymous_sessions WHERE anonymous_id = ? AND expires_at > ?
            )
            AND (
                SELECT COUNT(*) FROM session_messages WHERE anonymous_id = ? AND role = ?
            ) < ?
            "#,
        )
        .bind(anonymous_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(ts(message.timestamp))
        .bind(&message.provider)
        .bind(&message.model)
        .bind(message.response_time_ms.map(|v| v as i64))
        .bind(anonymous_id)
        .bind(ts(now))
        .bind(anonymous_id)
        .bind(Role::User.as_str())
        .bind(cap as i64)
        .execute(&mut *tx)
        .await
        .map_err(query_failed("insert user message"))?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await.map_err(query_failed("rollback"))?;
            return match self.load_session(anonymous_id, now).await? {
                Some(session) => Ok(UserAppend::AtCap(session)),
                None => Err(not_found(anonymous_id)),
            };
        }

        sqlx::query(
            r#"
            UPDATE anonymous_sessions
            SET message_count = message_count + 1, last_activity = ?, expires_at = ?
            WHERE anonymous_id = ?
            "#,
        )
        .bind(ts(now))
        .bind(ts(expiry(now)))
        .bind(anonymous_id)
        .execute(&mut *tx)
        .await
        .map_err(query_failed("bump session"))?;

        tx.commit().await.map_err(query_failed("commit"))?;

        self.load_session(anonymous_id, now)
            .await?
            .map(UserAppend::Accepted)
            .ok_or_else(|| not_found(anonymous_id))
    }

    async fn get(&self, anonymous_id: &str) -> Result<Option<AnonymousSession>, StoreError> {
        self.load_session(anonymous_id, Utc::now()).await
    }

    async fn mark_converted(
        &self,
        anonymous_id: &str,
        user_id: &str,
    ) -> Result<AnonymousSession, StoreError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE anonymous_sessions
            SET is_converted = 1, converted_user_id = ?, converted_at = ?
            WHERE anonymous_id = ? AND is_converted = 0 AND expires_at > ?
            "#,
        )
        .bind(user_id)
        .bind(ts(now))
        .bind(anonymous_id)
        .bind(ts(now))
        .execute(&self.pool)
        .await
        .map_err(query_failed("mark converted"))?;

        self.load_session(anonymous_id, now)
            .await?
            .ok_or_else(|| not_found(anonymous_id))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let cutoff = ts(now);
        let mut tx = self.pool.begin().await.map_err(query_failed("begin"))?;

        sqlx::query(
            "DELETE FROM session_messages WHERE anonymous_id IN
             (SELECT anonymous_id FROM anonymous_sessions WHERE expires_at <= ?)",
        )
        .bind(&cutoff)
        .execute(&mut *tx)
        .await
        .map_err(query_failed("purge messages"))?;

        let result = sqlx::query("DELETE FROM anonymous_sessions WHERE expires_at <= ?")
            .bind(&cutoff)
            .execute(&mut *tx)
            .await
            .map_err(query_failed("purge sessions"))?;

        tx.commit().await.map_err(query_failed("commit"))?;

        let purged = result.rows_affected() as usize;
        if purged > 0 {
            info!(purged, "Purged expired anonymous sessions");
        }
        Ok(purged)
    }
}

#[async_trait]
impl UserStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get_user(&self, user_id: &str) -> Result<Option<UserAccount>, StoreError> {
        sqlx::query("SELECT * FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_failed("get user"))?
            .as_ref()
            .map(Self::row_to_user)
            .transpose()
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<UserAccount>, StoreError> {
        sqlx::query("SELECT * FROM users WHERE api_token = ?")
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_failed("find user by token"))?
            .as_ref()
            .map(Self::row_to_user)
            .transpose()
    }

    async fn reset_daily_usage_if_stale(
        &self,
        user_id: &str,
        today: NaiveDate,
    ) -> Result<TokenUsage, StoreError> {
        let today = today.to_string();
        sqlx::query(
            "UPDATE users SET daily_tokens_used = 0, last_reset_date = ?
             WHERE id = ? AND last_reset_date <> ?",
        )
        .bind(&today)
        .bind(user_id)
        .bind(&today)
        .execute(&self.pool)
        .await
        .map_err(query_failed("reset daily usage"))?;

        self.usage_after_update(user_id).await
    }

    async fn record_token_usage(
        &self,
        user_id: &str,
        tokens: u64,
        today: NaiveDate,
    ) -> Result<TokenUsage, StoreError> {
        let today = today.to_string();
        let tokens = tokens as i64;
        let updated = sqlx::query(
            r#"
            UPDATE users SET
                daily_tokens_used = CASE WHEN last_reset_date = ? THEN daily_tokens_used + ? ELSE ? END,
                total_tokens_used = total_tokens_used + ?,
                last_reset_date = ?
            WHERE id = ?
            "#,
        )
        .bind(&today)
        .bind(tokens)
        .bind(tokens)
        .bind(tokens)
        .bind(&today)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(query_failed("record token usage"))?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("user '{user_id}'")));
        }
        self.usage_after_update(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn test_store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:").await.unwrap()
    }

    fn seed() -> SessionSeed {
        SessionSeed {
            ip_address: "198.51.100.4".into(),
            user_agent: "test-agent".into(),
            browser_fingerprint: "0".repeat(32),
            park_name: Some("Yosemite National Park".into()),
            park_code: Some("yose".into()),
            form_data: Some(serde_json::json!({"days": 3, "travelers": 2})),
        }
    }

    fn user(id: &str, role: UserRole, daily: u64, last_reset: NaiveDate) -> UserAccount {
        UserAccount {
            id: id.into(),
            email: Some(format!("{id}@example.com")),
            role,
            token_usage: TokenUsage {
                daily_tokens_used: daily,
                total_tokens_used: daily + 1000,
                last_reset_date: last_reset,
            },
        }
    }

    #[tokio::test]
    async fn find_or_create_roundtrip() {
        let store = test_store().await;
        let created = store.find_or_create("anon_1", seed()).await.unwrap();
        assert_eq!(created.anonymous_id, "anon_1");
        assert_eq!(created.park_code.as_deref(), Some("yose"));
        assert_eq!(created.form_data.as_ref().unwrap()["days"], 3);
        assert_eq!(created.message_count, 0);
        assert!(!created.is_converted);

        let mut other = seed();
        other.park_code = Some("zion".into());
        let again = store.find_or_create("anon_1", other).await.unwrap();
        assert_eq!(again.park_code.as_deref(), Some("yose"));
        assert_eq!(again.created_at, created.created_at);
    }

    #[tokio::test]
    async fn messages_keep_order_and_metadata() {
        let store = test_store().await;
        store.find_or_create("anon_1", seed()).await.unwrap();
        store
            .add_message("anon_1", SessionMessage::user("Any closures?"))
            .await
            .unwrap();
        let session = store
            .add_message(
                "anon_1",
                SessionMessage::assistant("Tioga Road is closed.")
                    .with_relay_metadata("claude", "claude-3-5-sonnet-20241022", 930),
            )
            .await
            .unwrap();

        assert_eq!(session.message_count, 2);
        assert_eq!(session.messages[0].role, Role::User);
        assert_eq!(session.messages[1].provider.as_deref(), Some("claude"));
        assert_eq!(session.messages[1].response_time_ms, Some(930));
        assert_eq!(session.user_message_count(), 1);
    }

    #[tokio::test]
    async fn user_append_stops_at_cap() {
        let store = test_store().await;
        store.find_or_create("anon_1", seed()).await.unwrap();

        for i in 0..3 {
            let outcome = store
                .append_user_message("anon_1", SessionMessage::user(format!("q{i}")), 3)
                .await
                .unwrap();
            assert!(matches!(outcome, UserAppend::Accepted(_)));
            store
                .add_message("anon_1", SessionMessage::assistant("a"))
                .await
                .unwrap();
        }

        let outcome = store
            .append_user_message("anon_1", SessionMessage::user("q3"), 3)
            .await
            .unwrap();
        let UserAppend::AtCap(session) = outcome else {
            panic!("fourth user message was stored");
        };
        assert_eq!(session.user_message_count(), 3);
        assert_eq!(session.message_count, 6);
    }

    #[tokio::test]
    async fn user_append_requires_live_session() {
        let store = test_store().await;
        let err = store
            .append_user_message("anon_none", SessionMessage::user("hi"), 3)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn add_message_requires_live_session() {
        let store = test_store().await;
        let err = store
            .add_message("anon_none", SessionMessage::user("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn expired_session_is_invisible_and_purged() {
        let store = test_store().await;
        store.find_or_create("anon_old", seed()).await.unwrap();
        store
            .add_message("anon_old", SessionMessage::user("hello"))
            .await
            .unwrap();
        store.find_or_create("anon_new", seed()).await.unwrap();

        // Age the first session past the TTL.
        let past = Utc::now() - Duration::hours(48) - Duration::seconds(1);
        sqlx::query(
            "UPDATE anonymous_sessions SET last_activity = ?, expires_at = ? WHERE anonymous_id = ?",
        )
        .bind(ts(past))
        .bind(ts(expiry(past)))
        .bind("anon_old")
        .execute(&store.pool)
        .await
        .unwrap();

        assert!(store.get("anon_old").await.unwrap().is_none());
        assert_eq!(store.purge_expired(Utc::now()).await.unwrap(), 1);
        assert!(store.get("anon_new").await.unwrap().is_some());

        let leftover: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM session_messages")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(leftover, 0);
    }

    #[tokio::test]
    async fn expired_session_is_recreated_fresh() {
        let store = test_store().await;
        store.find_or_create("anon_old", seed()).await.unwrap();
        store
            .add_message("anon_old", SessionMessage::user("hello"))
            .await
            .unwrap();

        let past = Utc::now() - Duration::hours(72);
        sqlx::query("UPDATE anonymous_sessions SET expires_at = ? WHERE anonymous_id = ?")
            .bind(ts(expiry(past)))
            .bind("anon_old")
            .execute(&store.pool)
            .await
            .unwrap();

        let fresh = store.find_or_create("anon_old", seed()).await.unwrap();
        assert_eq!(fresh.message_count, 0);
        assert!(fresh.messages.is_empty());
    }

    #[tokio::test]
    async fn mark_converted_is_set_once() {
        let store = test_store().await;
        store.find_or_create("anon_1", seed()).await.unwrap();

        let first = store.mark_converted("anon_1", "user-1").await.unwrap();
        let second = store.mark_converted("anon_1", "user-2").await.unwrap();
        assert!(first.is_converted);
        assert_eq!(second.converted_user_id.as_deref(), Some("user-1"));
        assert_eq!(first.converted_at, second.converted_at);

        assert!(matches!(
            store.mark_converted("anon_missing", "user-1").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn user_token_lookup() {
        let store = test_store().await;
        let today = Utc::now().date_naive();
        store
            .upsert_user(&user("u1", UserRole::Admin, 0, today), Some("tok-admin"))
            .await
            .unwrap();

        let found = store.find_by_token("tok-admin").await.unwrap().unwrap();
        assert_eq!(found.id, "u1");
        assert!(found.is_admin());
        assert!(store.find_by_token("tok-other").await.unwrap().is_none());
        assert!(store.get_user("u2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn record_usage_increments_atomically() {
        let store = test_store().await;
        let today = Utc::now().date_naive();
        store
            .upsert_user(&user("u1", UserRole::User, 100, today), None)
            .await
            .unwrap();

        store.record_token_usage("u1", 40, today).await.unwrap();
        let usage = store.record_token_usage("u1", 60, today).await.unwrap();
        assert_eq!(usage.daily_tokens_used, 200);
        assert_eq!(usage.total_tokens_used, 1200);
    }

    #[tokio::test]
    async fn record_usage_on_new_day_restarts_daily_counter() {
        let store = test_store().await;
        let today = Utc::now().date_naive();
        store
            .upsert_user(&user("u1", UserRole::User, 4800, today - Duration::days(1)), None)
            .await
            .unwrap();

        let usage = store.record_token_usage("u1", 75, today).await.unwrap();
        assert_eq!(usage.daily_tokens_used, 75);
        assert_eq!(usage.total_tokens_used, 5875);
        assert_eq!(usage.last_reset_date, today);
    }

    #[tokio::test]
    async fn reset_if_stale_only_touches_old_days() {
        let store = test_store().await;
        let today = Utc::now().date_naive();
        store
            .upsert_user(&user("fresh", UserRole::User, 300, today), None)
            .await
            .unwrap();
        store
            .upsert_user(&user("stale", UserRole::User, 5000, today - Duration::days(1)), None)
            .await
            .unwrap();

        assert_eq!(
            store
                .reset_daily_usage_if_stale("fresh", today)
                .await
                .unwrap()
                .daily_tokens_used,
            300
        );
        let stale = store.reset_daily_usage_if_stale("stale", today).await.unwrap();
        assert_eq!(stale.daily_tokens_used, 0);
        assert_eq!(stale.total_tokens_used, 6000);
    }

    #[tokio::test]
    async fn file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trailverse.db");
        let url = format!("sqlite://{}", path.display());

        {
            let store = SqliteStore::new(&url).await.unwrap();
            store.find_or_create("anon_1", seed()).await.unwrap();
            store
                .add_message("anon_1", SessionMessage::user("hi"))
                .await
                .unwrap();
        }

        let reopened = SqliteStore::new(&url).await.unwrap();
        let session = reopened.get("anon_1").await.unwrap().unwrap();
        assert_eq!(session.message_count, 1);
    }
}
