//! Background computation faults and the compute queue running against the database.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use helpers::{row, seed};
use riskscore::config::RiskCacheConfig;
use riskscore::data::risk_cache::{CacheStatus, RiskCache};
use riskscore::risk::compute::{ComputeOutcome, compute_fn, compute_risk_score};
use riskscore::risk::{RiskLookup, RiskService, queue};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

fn cache(pool: &PgPool) -> RiskCache {
    RiskCache::new(pool.clone(), RiskCacheConfig::default())
}

#[sqlx::test]
async fn query_fault_marks_entry_failed(pool: PgPool) {
    seed(&pool, &[row("Sudan", "Khartoum", 10, 3.0)]).await;
    let cache = cache(&pool);
    cache.ensure_entry("sudan").await.unwrap();
    assert!(cache.try_claim_for_computation("sudan").await.unwrap());

    sqlx::query("ALTER TABLE conflict_data RENAME TO conflict_data_moved")
        .execute(&pool)
        .await
        .unwrap();

    assert_eq!(
        compute_risk_score(&cache, "sudan").await,
        ComputeOutcome::Failed
    );

    let entry = cache.get_entry("sudan").await.unwrap().unwrap();
    assert_eq!(entry.status, CacheStatus::Failed);
    let last_error = entry.last_error.unwrap_or_default();
    assert!(last_error.contains("conflict_data"), "last_error: {last_error}");
}

#[sqlx::test]
async fn failed_failure_write_is_swallowed(pool: PgPool) {
    let cache = cache(&pool);
    cache.ensure_entry("sudan").await.unwrap();
    cache.try_claim_for_computation("sudan").await.unwrap();

    pool.close().await;

    assert_eq!(
        compute_risk_score(&cache, "sudan").await,
        ComputeOutcome::Failed
    );
}

#[sqlx::test]
async fn queued_computation_reaches_found(pool: PgPool) {
    seed(&pool, &[row("Sudan", "Khartoum", 10, 3.0), row("Sudan", "Darfur", 20, 5.0)]).await;

    let config = RiskCacheConfig::default();
    let (compute_queue, worker) = queue::channel(
        compute_fn(RiskCache::new(pool.clone(), config.clone())),
        config.compute_concurrency,
    );
    let service = RiskService::new(pool.clone(), config, Arc::new(compute_queue));

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(worker.run(shutdown.clone(), Duration::from_secs(1)));

    assert_eq!(
        service.get_status_or_schedule("Sudan").await.unwrap(),
        RiskLookup::Pending
    );

    let found = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match service.get_status_or_schedule("Sudan").await.unwrap() {
                RiskLookup::Found(score) => break score,
                _ => tokio::time::sleep(Duration::from_millis(20)).await,
            }
        }
    })
    .await
    .expect("score was not computed in time");
    assert_eq!(found, 4.0);

    shutdown.cancel();
    handle.await.unwrap();
}
