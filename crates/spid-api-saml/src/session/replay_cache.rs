//! Assertion replay cache
//!
//! Records the IDs of assertions that produced a login. An ID stays
//! recorded until the assertion's own `NotOnOrAfter` plus the allowed
//! clock skew, after which the validator would reject it anyway.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use moka::Expiry;
use sqlx::PgPool;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Maximum number of assertion IDs kept in memory.
const MAX_CACHE_ENTRIES: u64 = 100_000;

/// Replay cache errors
#[derive(Debug, Error, Clone)]
pub enum ReplayCacheError {
    #[error("Replay cache storage error: {0}")]
    Storage(String),
}

/// An assertion ID together with the instant it stops being valid
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedAssertion {
    pub assertion_id: String,
    /// Assertion `NotOnOrAfter` (UTC)
    pub expires_at: DateTime<Utc>,
}

impl ConsumedAssertion {
    #[must_use]
    pub fn new(assertion_id: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            assertion_id: assertion_id.into(),
            expires_at,
        }
    }

    /// Instant until which the ID must be retained
    fn retain_until(&self, clock_skew: chrono::Duration) -> DateTime<Utc> {
        self.expires_at + clock_skew
    }
}

/// Set of consumed assertion IDs with per-entry expiry
#[async_trait]
pub trait ReplayCache: Send + Sync {
    /// Whether `assertion_id` was already used for a login
    async fn has_been_consumed(&self, assertion_id: &str) -> Result<bool, ReplayCacheError>;

    /// Record an assertion as consumed
    async fn mark_consumed(&self, assertion: ConsumedAssertion) -> Result<(), ReplayCacheError>;

    /// Atomically record an assertion unless it is already present.
    ///
    /// Returns `true` when this call inserted it.
    async fn try_mark_consumed(
        &self,
        assertion: ConsumedAssertion,
    ) -> Result<bool, ReplayCacheError>;
}

fn log_consumed(assertion: &ConsumedAssertion, retain_until: DateTime<Utc>) {
    tracing::info!(
        assertion_id = %assertion.assertion_id,
        expires_at_utc = %assertion.expires_at,
        expires_at_local = %assertion.expires_at.with_timezone(&chrono::Local),
        retain_until = %retain_until,
        "Assertion marked as consumed"
    );
}

struct ConsumedExpiry {
    clock_skew: chrono::Duration,
}

impl Expiry<String, ConsumedAssertion> for ConsumedExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &ConsumedAssertion,
        _created_at: Instant,
    ) -> Option<Duration> {
        let remaining = value.retain_until(self.clock_skew) - Utc::now();
        Some(
            remaining
                .to_std()
                .unwrap_or(Duration::ZERO)
                .max(Duration::from_secs(1)),
        )
    }
}

/// In-process replay cache on `moka`
#[derive(Clone)]
pub struct InMemoryReplayCache {
    cache: Cache<String, ConsumedAssertion>,
    clock_skew: chrono::Duration,
}

impl InMemoryReplayCache {
    #[must_use]
    pub fn new(clock_skew_seconds: i64) -> Self {
        let clock_skew = chrono::Duration::seconds(clock_skew_seconds.max(0));
        let cache = Cache::builder()
            .max_capacity(MAX_CACHE_ENTRIES)
            .expire_after(ConsumedExpiry { clock_skew })
            .build();
        Self { cache, clock_skew }
    }
}

impl Default for InMemoryReplayCache {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_CLOCK_SKEW_SECONDS)
    }
}

#[async_trait]
impl ReplayCache for InMemoryReplayCache {
    async fn has_been_consumed(&self, assertion_id: &str) -> Result<bool, ReplayCacheError> {
        Ok(self.cache.get(assertion_id).await.is_some())
    }

    async fn mark_consumed(&self, assertion: ConsumedAssertion) -> Result<(), ReplayCacheError> {
        log_consumed(&assertion, assertion.retain_until(self.clock_skew));
        self.cache
            .insert(assertion.assertion_id.clone(), assertion)
            .await;
        Ok(())
    }

    async fn try_mark_consumed(
        &self,
        assertion: ConsumedAssertion,
    ) -> Result<bool, ReplayCacheError> {
        let retain_until = assertion.retain_until(self.clock_skew);
        let entry = self
            .cache
            .entry(assertion.assertion_id.clone())
            .or_insert(assertion.clone())
            .await;

        if entry.is_fresh() {
            log_consumed(&assertion, retain_until);
        }
        Ok(entry.is_fresh())
    }
}

/// PostgreSQL-backed replay cache shared by every SP instance
pub struct PostgresReplayCache {
    pool: PgPool,
    clock_skew: chrono::Duration,
}

impl PostgresReplayCache {
    #[must_use]
    pub fn new(pool: PgPool, clock_skew_seconds: i64) -> Self {
        Self {
            pool,
            clock_skew: chrono::Duration::seconds(clock_skew_seconds.max(0)),
        }
    }

    /// Delete rows past their retention instant.
    ///
    /// Returns the number of rows deleted.
    pub async fn cleanup_expired(&self) -> Result<u64, ReplayCacheError> {
        let result = sqlx::query(
            r"
            DELETE FROM spid_consumed_assertions
            WHERE retain_until <= $1
            ",
        )
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| ReplayCacheError::Storage(e.to_string()))?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            tracing::debug!(deleted = deleted, "Cleaned up expired consumed assertions");
        }
        Ok(deleted)
    }
}

#[async_trait]
impl ReplayCache for PostgresReplayCache {
    async fn has_been_consumed(&self, assertion_id: &str) -> Result<bool, ReplayCacheError> {
        let row = sqlx::query(
            r"
            SELECT assertion_id
            FROM spid_consumed_assertions
            WHERE assertion_id = $1 AND retain_until > $2
            ",
        )
        .bind(assertion_id)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ReplayCacheError::Storage(e.to_string()))?;

        Ok(row.is_some())
    }

    async fn mark_consumed(&self, assertion: ConsumedAssertion) -> Result<(), ReplayCacheError> {
        self.try_mark_consumed(assertion).await.map(|_| ())
    }

    async fn try_mark_consumed(
        &self,
        assertion: ConsumedAssertion,
    ) -> Result<bool, ReplayCacheError> {
        let retain_until = assertion.retain_until(self.clock_skew);

        // An expired row for the same ID may be reclaimed; a live one wins.
        let row = sqlx::query(
            r"
            INSERT INTO spid_consumed_assertions
                (assertion_id, not_on_or_after, retain_until, consumed_at)
            VALUES
                ($1, $2, $3, $4)
            ON CONFLICT (assertion_id) DO UPDATE
                SET not_on_or_after = EXCLUDED.not_on_or_after,
                    retain_until = EXCLUDED.retain_until,
                    consumed_at = EXCLUDED.consumed_at
                WHERE spid_consumed_assertions.retain_until <= EXCLUDED.consumed_at
            RETURNING assertion_id
            ",
        )
        .bind(&assertion.assertion_id)
        .bind(assertion.expires_at)
        .bind(retain_until)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ReplayCacheError::Storage(e.to_string()))?;

        if row.is_some() {
            log_consumed(&assertion, retain_until);
        }
        Ok(row.is_some())
    }
}
