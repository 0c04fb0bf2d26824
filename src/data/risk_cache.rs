//! Persistent per-country risk score cache with computation status.
//!
//! One `risk_score_cache` row exists per normalized country. All cross-request
//! coordination happens through single-statement transitions on that row:
//!
//! - creation is `INSERT ... ON CONFLICT DO NOTHING` followed by a read,
//! - claiming is an `UPDATE` guarded by `status <> 'computing'`,
//! - terminal writes and invalidation are unconditional (last writer wins).
//!
//! Nothing here takes an in-process lock, so the guarantees hold across any
//! number of workers sharing the database.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, info, warn};

use crate::config::RiskCacheConfig;

/// Lifecycle state of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheStatus {
    /// A computation has claimed the entry and has not finished.
    Computing,
    /// `score` and `computed_at` hold a trusted value.
    Ready,
    /// The last computation failed; `last_error` says why.
    Failed,
    /// Never computed, or invalidated since the last computation.
    Stale,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Computing => "computing",
            CacheStatus::Ready => "ready",
            CacheStatus::Failed => "failed",
            CacheStatus::Stale => "stale",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "computing" => Some(CacheStatus::Computing),
            "ready" => Some(CacheStatus::Ready),
            "failed" => Some(CacheStatus::Failed),
            "stale" => Some(CacheStatus::Stale),
            _ => None,
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Stored as VARCHAR; decode through the string codec and reject unknown values.
impl sqlx::Type<sqlx::Postgres> for CacheStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Postgres>>::compatible(ty)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for CacheStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let raw = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        CacheStatus::parse(raw).ok_or_else(|| format!("unknown cache status {raw:?}").into())
    }
}

/// A `risk_score_cache` row.
#[derive(sqlx::FromRow, Debug, Clone)]
pub struct CacheEntry {
    pub id: i32,
    pub country_norm: String,
    pub status: CacheStatus,
    pub score: Option<f64>,
    pub computed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl CacheEntry {
    /// The score, but only when the entry is `ready`. Leftover values on
    /// entries in any other state are never surfaced.
    pub fn ready_score(&self) -> Option<f64> {
        match self.status {
            CacheStatus::Ready => self.score,
            _ => None,
        }
    }
}

const ENTRY_SELECT: &str = "SELECT id, country_norm, status, score, computed_at, last_error, updated_at \
     FROM risk_score_cache";

/// Truncate `s` to at most `max_chars` characters without splitting a code point.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &s[..byte_idx],
        None => s,
    }
}

/// Mark the entry for `country_norm` stale and clear its value.
///
/// Accepts any executor so callers can run it inside the same transaction as
/// the source-data change that caused it. A key with no entry is left alone;
/// readers create entries lazily.
pub async fn invalidate(
    executor: impl sqlx::PgExecutor<'_>,
    country_norm: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE risk_score_cache
        SET status = 'stale',
            score = NULL,
            computed_at = NULL,
            last_error = NULL,
            updated_at = now()
        WHERE country_norm = $1
        "#,
    )
    .bind(country_norm)
    .execute(executor)
    .await?;
    Ok(())
}

/// [`invalidate`] for several keys in one statement.
pub async fn invalidate_many(
    executor: impl sqlx::PgExecutor<'_>,
    country_norms: &[String],
) -> Result<u64, sqlx::Error> {
    if country_norms.is_empty() {
        return Ok(0);
    }

    let result = sqlx::query(
        r#"
        UPDATE risk_score_cache
        SET status = 'stale',
            score = NULL,
            computed_at = NULL,
            last_error = NULL,
            updated_at = now()
        WHERE country_norm = ANY($1)
        "#,
    )
    .bind(country_norms)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

/// Handle to the cache table. Clone-cheap.
#[derive(Clone)]
pub struct RiskCache {
    pool: PgPool,
    config: Arc<RiskCacheConfig>,
}

impl RiskCache {
    pub fn new(pool: PgPool, config: RiskCacheConfig) -> Self {
        Self {
            pool,
            config: Arc::new(config),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn config(&self) -> &RiskCacheConfig {
        &self.config
    }

    /// Return the entry for `country_norm`, creating it as `stale` if absent.
    ///
    /// Concurrent callers racing on a new key all succeed: the insert silently
    /// yields to whichever one landed first, and the read sees that row.
    pub async fn ensure_entry(&self, country_norm: &str) -> Result<CacheEntry, sqlx::Error> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO risk_score_cache (country_norm, status)
            VALUES ($1, 'stale')
            ON CONFLICT (country_norm) DO NOTHING
            "#,
        )
        .bind(country_norm)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() > 0 {
            debug!(country_norm, "Created risk cache entry");
        }

        sqlx::query_as::<_, CacheEntry>(&format!("{ENTRY_SELECT} WHERE country_norm = $1"))
            .bind(country_norm)
            .fetch_one(&self.pool)
            .await
    }

    /// Read the entry for `country_norm` without creating it.
    pub async fn get_entry(&self, country_norm: &str) -> Result<Option<CacheEntry>, sqlx::Error> {
        sqlx::query_as::<_, CacheEntry>(&format!("{ENTRY_SELECT} WHERE country_norm = $1"))
            .bind(country_norm)
            .fetch_optional(&self.pool)
            .await
    }

    /// Atomically claim the entry for computation.
    ///
    /// Returns `true` if this caller moved the entry into `computing` and must
    /// now schedule the computation, `false` if another claim is in flight (or
    /// the entry does not exist).
    pub async fn try_claim_for_computation(&self, country_norm: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE risk_score_cache
            SET status = 'computing', last_error = NULL, updated_at = now()
            WHERE country_norm = $1 AND status <> 'computing'
            "#,
        )
        .bind(country_norm)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Store a computed score and mark the entry `ready`.
    ///
    /// Unconditional: if the entry was invalidated while the computation ran,
    /// this write still wins.
    pub async fn mark_ready(&self, country_norm: &str, score: f64) -> Result<(), sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE risk_score_cache
            SET status = 'ready', score = $2, computed_at = now(), last_error = NULL, updated_at = now()
            WHERE country_norm = $1
            "#,
        )
        .bind(country_norm)
        .bind(score)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!(country_norm, "mark_ready found no cache entry");
        }
        Ok(())
    }

    /// Mark the entry `failed`, storing a truncated error message. `score` is left as-is.
    pub async fn mark_failed(&self, country_norm: &str, error: &str) -> Result<(), sqlx::Error> {
        let message = truncate_chars(error, self.config.error_max_len);
        let result = sqlx::query(
            r#"
            UPDATE risk_score_cache
            SET status = 'failed', last_error = $2, updated_at = now()
            WHERE country_norm = $1
            "#,
        )
        .bind(country_norm)
        .bind(message)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!(country_norm, "mark_failed found no cache entry");
        }
        Ok(())
    }

    /// Mark the entry stale and clear its value. See [`invalidate`].
    pub async fn invalidate(&self, country_norm: &str) -> Result<(), sqlx::Error> {
        invalidate(&self.pool, country_norm).await
    }

    /// Recover claims orphaned by a previous process: every `computing` entry
    /// becomes `failed` with the configured diagnostic. Returns the number of
    /// entries recovered.
    ///
    /// Must run before any reads are served; a claim held by a live process in
    /// this instance would otherwise be clobbered.
    pub async fn reset_stuck_on_restart(&self) -> Result<u64, sqlx::Error> {
        let message = truncate_chars(&self.config.startup_reset_message, self.config.error_max_len);
        let result = sqlx::query(
            r#"
            UPDATE risk_score_cache
            SET status = 'failed', last_error = $1, updated_at = now()
            WHERE status = 'computing'
            "#,
        )
        .bind(message)
        .execute(&self.pool)
        .await?;

        let count = result.rows_affected();
        if count > 0 {
            info!(count, "Recovered orphaned risk score computations");
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            CacheStatus::Computing,
            CacheStatus::Ready,
            CacheStatus::Failed,
            CacheStatus::Stale,
        ] {
            assert_eq!(CacheStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(CacheStatus::parse("READY"), None);
        assert_eq!(CacheStatus::parse(""), None);
    }

    #[test]
    fn status_display_matches_column_value() {
        assert_eq!(CacheStatus::Computing.to_string(), "computing");
        assert_eq!(CacheStatus::Stale.to_string(), "stale");
    }

    fn entry(status: CacheStatus, score: Option<f64>) -> CacheEntry {
        CacheEntry {
            id: 1,
            country_norm: "sudan".to_string(),
            status,
            score,
            computed_at: score.map(|_| Utc::now()),
            last_error: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn ready_score_only_surfaces_ready_entries() {
        assert_eq!(entry(CacheStatus::Ready, Some(4.0)).ready_score(), Some(4.0));
        assert_eq!(entry(CacheStatus::Failed, Some(4.0)).ready_score(), None);
        assert_eq!(entry(CacheStatus::Computing, Some(4.0)).ready_score(), None);
        assert_eq!(entry(CacheStatus::Stale, None).ready_score(), None);
    }

    #[test]
    fn truncate_respects_limit() {
        assert_eq!(truncate_chars("abcdef", 3), "abc");
        assert_eq!(truncate_chars("abc", 3), "abc");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 0), "");
    }

    #[test]
    fn truncate_never_splits_code_points() {
        let s = "ééééé";
        assert_eq!(truncate_chars(s, 2), "éé");
        assert_eq!(truncate_chars("日本語テキスト", 3), "日本語");
    }
}
