//! Single-flight risk score coordination.
//!
//! [`RiskService`] decides, per read, whether to serve a cached score, report
//! that a computation is pending, or start one. It never waits on a
//! computation: claims are made atomically in the database and the work is
//! handed to a [`ComputeScheduler`].

pub mod compute;
pub mod queue;

use std::sync::Arc;

use sqlx::PgPool;
use tracing::{debug, info};

use crate::config::RiskCacheConfig;
use crate::data::conflicts;
use crate::data::normalize::normalize;
use crate::data::risk_cache::{CacheStatus, RiskCache};

pub use queue::{ComputeQueue, ComputeScheduler, ComputeWorker};

/// The answer to a risk score read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RiskLookup {
    /// The cached, trusted score.
    Found(f64),
    /// A computation is in flight or was just scheduled; poll again later.
    Pending,
    /// No source rows exist for this country.
    NotFound,
}

/// Infrastructure failures surfaced to callers of [`RiskService`].
///
/// Distinct from an entry's `failed` status, which is a computation outcome
/// and is retried transparently.
#[derive(Debug, thiserror::Error)]
pub enum RiskError {
    #[error("risk cache storage error")]
    Storage(#[from] sqlx::Error),
}

/// Coordinates reads, claims and invalidation for the risk score cache. Clone-cheap.
#[derive(Clone)]
pub struct RiskService {
    cache: RiskCache,
    scheduler: Arc<dyn ComputeScheduler>,
}

impl RiskService {
    pub fn new(
        pool: PgPool,
        config: RiskCacheConfig,
        scheduler: Arc<dyn ComputeScheduler>,
    ) -> Self {
        Self {
            cache: RiskCache::new(pool, config),
            scheduler,
        }
    }

    pub fn cache(&self) -> &RiskCache {
        &self.cache
    }

    /// Serve the cached score for `raw_country`, or make sure one is being computed.
    ///
    /// N concurrent calls for the same stale key schedule exactly one
    /// computation and all return [`RiskLookup::Pending`].
    pub async fn get_status_or_schedule(&self, raw_country: &str) -> Result<RiskLookup, RiskError> {
        let country_norm = normalize(raw_country);

        // Checked before touching the cache so unknown keys never get a row.
        if !conflicts::country_exists(self.cache.pool(), &country_norm).await? {
            return Ok(RiskLookup::NotFound);
        }

        let entry = self.cache.ensure_entry(&country_norm).await?;
        if let Some(score) = entry.ready_score() {
            return Ok(RiskLookup::Found(score));
        }

        if entry.status == CacheStatus::Computing {
            debug!(country_norm = %country_norm, "Risk score computation already in flight");
        }
        self.claim_and_schedule(&country_norm).await?;
        Ok(RiskLookup::Pending)
    }

    /// Force recomputation of `raw_country` on its next read. No-op for a key
    /// that has never been read.
    pub async fn invalidate(&self, raw_country: &str) -> Result<(), RiskError> {
        let country_norm = normalize(raw_country);
        self.cache.invalidate(&country_norm).await?;
        info!(country_norm = %country_norm, "Risk score invalidated");
        Ok(())
    }

    /// Recover claims orphaned by a previous process. Call once at startup,
    /// before any reads are served.
    pub async fn reset_stuck_on_restart(&self) -> Result<u64, RiskError> {
        Ok(self.cache.reset_stuck_on_restart().await?)
    }

    /// Delete one source row, invalidating its country's score in the same transaction.
    ///
    /// If rows remain for the country, a recomputation is started right away
    /// so the next read is likely to hit. Returns `false` if the row did not exist.
    pub async fn delete_conflict(&self, country: &str, admin1: &str) -> Result<bool, RiskError> {
        if !conflicts::delete_row(self.cache.pool(), country, admin1).await? {
            return Ok(false);
        }

        let country_norm = normalize(country);
        info!(
            country_norm = %country_norm,
            admin1_norm = %normalize(admin1),
            "Conflict data deleted"
        );

        if conflicts::country_exists(self.cache.pool(), &country_norm).await? {
            self.cache.ensure_entry(&country_norm).await?;
            self.claim_and_schedule(&country_norm).await?;
        }
        Ok(true)
    }

    /// Claim `country_norm` and, if this caller won, hand it to the scheduler.
    async fn claim_and_schedule(&self, country_norm: &str) -> Result<bool, RiskError> {
        let claimed = self.cache.try_claim_for_computation(country_norm).await?;
        if claimed {
            debug!(country_norm, "Claimed risk score computation");
            self.scheduler.schedule(country_norm.to_owned());
        }
        Ok(claimed)
    }
}
