#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use riskscore::config::RiskCacheConfig;
use riskscore::data::conflicts::{self, NewConflictRow};
use riskscore::risk::{ComputeScheduler, RiskService};
use sqlx::PgPool;

/// A scheduler that records each key it is handed instead of running anything.
#[derive(Default)]
pub struct RecordingScheduler {
    scheduled: Mutex<Vec<String>>,
}

impl RecordingScheduler {
    pub fn count(&self) -> usize {
        self.scheduled.lock().unwrap().len()
    }

    pub fn keys(&self) -> Vec<String> {
        self.scheduled.lock().unwrap().clone()
    }
}

impl ComputeScheduler for RecordingScheduler {
    fn schedule(&self, country_norm: String) {
        self.scheduled.lock().unwrap().push(country_norm);
    }
}

/// Build a `NewConflictRow` with a population of 1000.
pub fn row(country: &str, admin1: &str, events: i32, score: f64) -> NewConflictRow {
    NewConflictRow {
        country: country.to_owned(),
        admin1: admin1.to_owned(),
        population: Some(1000),
        events,
        score,
    }
}

/// Insert source rows, panicking on failure.
pub async fn seed(pool: &PgPool, rows: &[NewConflictRow]) {
    conflicts::upsert_rows(pool, rows)
        .await
        .expect("failed to seed conflict rows");
}

/// A `RiskService` wired to a recording scheduler.
pub fn service(pool: &PgPool) -> (RiskService, Arc<RecordingScheduler>) {
    service_with_config(pool, RiskCacheConfig::default())
}

pub fn service_with_config(
    pool: &PgPool,
    config: RiskCacheConfig,
) -> (RiskService, Arc<RecordingScheduler>) {
    let scheduler = Arc::new(RecordingScheduler::default());
    let service = RiskService::new(pool.clone(), config, scheduler.clone());
    (service, scheduler)
}
