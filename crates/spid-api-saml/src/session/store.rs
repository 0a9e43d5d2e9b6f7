//! Browser session storage
//!
//! Sessions are keyed by the opaque ID carried in the `spid_session` cookie.
//! Every write replaces the whole record.

use super::types::{BrowserSession, SessionError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use sqlx::{PgPool, Row};
use std::time::Duration;
use uuid::Uuid;

/// Maximum number of browser sessions kept in memory.
const MAX_SESSIONS: u64 = 100_000;

/// Session store trait for browser sessions
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session by ID
    async fn load(&self, session_id: Uuid) -> Result<Option<BrowserSession>, SessionError>;

    /// Replace the stored record for `session_id`
    async fn save(&self, session_id: Uuid, session: BrowserSession) -> Result<(), SessionError>;

    /// Remove a session
    async fn destroy(&self, session_id: Uuid) -> Result<(), SessionError>;
}

/// In-memory session store with an idle timeout
#[derive(Clone)]
pub struct InMemorySessionStore {
    sessions: Cache<Uuid, BrowserSession>,
}

impl InMemorySessionStore {
    /// Sessions idle for longer than `idle_timeout` are dropped
    #[must_use]
    pub fn new(idle_timeout: Duration) -> Self {
        let sessions = Cache::builder()
            .max_capacity(MAX_SESSIONS)
            .time_to_idle(idle_timeout)
            .build();
        Self { sessions }
    }

    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.sessions.entry_count()
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(
            crate::config::DEFAULT_SESSION_LIFETIME_SECONDS,
        ))
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, session_id: Uuid) -> Result<Option<BrowserSession>, SessionError> {
        Ok(self.sessions.get(&session_id).await)
    }

    async fn save(&self, session_id: Uuid, session: BrowserSession) -> Result<(), SessionError> {
        self.sessions.insert(session_id, session).await;
        Ok(())
    }

    async fn destroy(&self, session_id: Uuid) -> Result<(), SessionError> {
        self.sessions.invalidate(&session_id).await;
        tracing::debug!(session_id = %session_id, "Browser session destroyed");
        Ok(())
    }
}

/// PostgreSQL session store, for SP replicas sharing their sessions.
///
/// Records are kept as JSON. Reading a session pushes its expiry forward,
/// matching the idle timeout of the in-memory store.
#[derive(Clone)]
pub struct PostgresSessionStore {
    pool: PgPool,
    idle_timeout: chrono::Duration,
}

impl PostgresSessionStore {
    #[must_use]
    pub fn new(pool: PgPool, idle_timeout: Duration) -> Self {
        let idle_timeout =
            chrono::Duration::from_std(idle_timeout).unwrap_or_else(|_| chrono::Duration::days(1));
        Self { pool, idle_timeout }
    }

    fn expiry_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.idle_timeout)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Delete sessions idle past their expiry.
    ///
    /// Returns the number of rows deleted.
    pub async fn cleanup_expired(&self) -> Result<u64, SessionError> {
        let result = sqlx::query(
            r"
            DELETE FROM spid_browser_sessions
            WHERE expires_at <= $1
            ",
        )
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| SessionError::StorageError(e.to_string()))?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            tracing::debug!(deleted = deleted, "Cleaned up idle browser sessions");
        }
        Ok(deleted)
    }
}

fn encode_record(session: &BrowserSession) -> Result<String, SessionError> {
    serde_json::to_string(session).map_err(|e| SessionError::StorageError(e.to_string()))
}

fn decode_record(session_id: Uuid, record: &str) -> Result<BrowserSession, SessionError> {
    serde_json::from_str(record).map_err(|e| {
        tracing::warn!(session_id = %session_id, error = %e, "Undecodable browser session");
        SessionError::Corrupted(format!("session {session_id}: {e}"))
    })
}

#[async_trait]
impl SessionStore for PostgresSessionStore {
    async fn load(&self, session_id: Uuid) -> Result<Option<BrowserSession>, SessionError> {
        let now = Utc::now();
        let row = sqlx::query(
            r"
            UPDATE spid_browser_sessions
            SET expires_at = $2
            WHERE session_id = $1 AND expires_at > $3
            RETURNING record
            ",
        )
        .bind(session_id)
        .bind(self.expiry_from(now))
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SessionError::StorageError(e.to_string()))?;

        row.map(|row| {
            let record: String = row
                .try_get("record")
                .map_err(|e| SessionError::StorageError(e.to_string()))?;
            decode_record(session_id, &record)
        })
        .transpose()
    }

    async fn save(&self, session_id: Uuid, session: BrowserSession) -> Result<(), SessionError> {
        let record = encode_record(&session)?;
        let now = Utc::now();
        sqlx::query(
            r"
            INSERT INTO spid_browser_sessions (session_id, record, expires_at, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (session_id) DO UPDATE
                SET record = EXCLUDED.record,
                    expires_at = EXCLUDED.expires_at,
                    updated_at = EXCLUDED.updated_at
            ",
        )
        .bind(session_id)
        .bind(record)
        .bind(self.expiry_from(now))
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| SessionError::StorageError(e.to_string()))?;
        Ok(())
    }

    async fn destroy(&self, session_id: Uuid) -> Result<(), SessionError> {
        sqlx::query("DELETE FROM spid_browser_sessions WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| SessionError::StorageError(e.to_string()))?;
        tracing::debug!(session_id = %session_id, "Browser session destroyed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::types::AuthenticationRequestContext;

    #[test]
    fn test_record_encoding() {
        let session = BrowserSession {
            pending: Some(AuthenticationRequestContext::new(
                "poste".into(),
                "_req".into(),
                Some("/area".into()),
            )),
            authenticated: None,
        };
        let record = encode_record(&session).unwrap();
        assert_eq!(decode_record(Uuid::nil(), &record).unwrap(), session);

        assert!(matches!(
            decode_record(Uuid::nil(), "{\"pending\": 42}"),
            Err(SessionError::Corrupted(_))
        ));
    }

    #[tokio::test]
    async fn test_save_load_destroy() {
        let store = InMemorySessionStore::default();
        let id = Uuid::new_v4();
        assert!(store.load(id).await.unwrap().is_none());

        let session = BrowserSession {
            pending: Some(AuthenticationRequestContext::new(
                "poste".into(),
                "_req".into(),
                None,
            )),
            authenticated: None,
        };
        store.save(id, session.clone()).await.unwrap();
        assert_eq!(store.load(id).await.unwrap(), Some(session));

        store.destroy(id).await.unwrap();
        assert!(store.load(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_replaces_whole_record() {
        let store = InMemorySessionStore::default();
        let id = Uuid::new_v4();

        let pending = BrowserSession {
            pending: Some(AuthenticationRequestContext::new(
                "poste".into(),
                "_req".into(),
                None,
            )),
            authenticated: None,
        };
        store.save(id, pending).await.unwrap();
        store.save(id, BrowserSession::default()).await.unwrap();

        assert_eq!(store.load(id).await.unwrap(), Some(BrowserSession::default()));
    }
}
