//! The background risk score computation.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tracing::{Instrument, error, info, info_span, warn};

use crate::data::conflicts;
use crate::data::risk_cache::RiskCache;
use crate::risk::queue::ComputeFn;
use crate::utils::log_if_slow;

/// Stored in `last_error` when a claimed country has no source rows.
pub const NO_ROWS_MESSAGE: &str = "no rows for country";

/// What a computation wrote to the cache.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ComputeOutcome {
    Ready(f64),
    NoRows,
    Failed,
}

/// Compute and store the mean score for `country_norm`.
///
/// Never returns an error and never unwinds: query or write faults, and panics
/// in either, end with the entry marked `failed`. A fault while writing that
/// failure is logged and swallowed.
pub async fn compute_risk_score(cache: &RiskCache, country_norm: &str) -> ComputeOutcome {
    let span = info_span!("compute_risk_score", country_norm);
    async move {
        info!("Starting risk score computation");
        let start = Instant::now();

        let result = AssertUnwindSafe(try_compute(cache, country_norm))
            .catch_unwind()
            .await;

        log_if_slow(start, cache.config().compute_slow_threshold, "risk score computation");

        let message = match result {
            Ok(Ok(outcome)) => {
                match outcome {
                    ComputeOutcome::Ready(score) => info!(score, "Risk score computation complete"),
                    _ => warn!("Risk score computation found no source rows"),
                }
                return outcome;
            }
            Ok(Err(e)) => {
                error!(error = ?e, "Risk score computation failed");
                e.to_string()
            }
            Err(panic) => {
                let detail = panic_message(panic.as_ref());
                error!(panic = detail, "Risk score computation panicked");
                format!("computation panicked: {detail}")
            }
        };

        if let Err(e) = cache.mark_failed(country_norm, &message).await {
            error!(error = ?e, "Failed to mark risk score computation as failed");
        }
        ComputeOutcome::Failed
    }
    .instrument(span)
    .await
}

async fn try_compute(cache: &RiskCache, country_norm: &str) -> Result<ComputeOutcome, sqlx::Error> {
    match conflicts::mean_score(cache.pool(), country_norm).await? {
        Some(score) => {
            cache.mark_ready(country_norm, score).await?;
            Ok(ComputeOutcome::Ready(score))
        }
        None => {
            cache.mark_failed(country_norm, NO_ROWS_MESSAGE).await?;
            Ok(ComputeOutcome::NoRows)
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Wrap [`compute_risk_score`] as the compute queue's job function.
pub fn compute_fn(cache: RiskCache) -> ComputeFn {
    Arc::new(move |country_norm: String| {
        let cache = cache.clone();
        async move {
            compute_risk_score(&cache, &country_norm).await;
        }
        .boxed()
    })
}
