//! Application state shared across the web service and background workers.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde::Serialize;
use sqlx::PgPool;
use ts_rs::TS;

use crate::risk::RiskService;

/// Health status of a service.
#[derive(Debug, Clone, Serialize, PartialEq, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum ServiceStatus {
    Starting,
    Active,
    Disabled,
    Error,
}

/// A timestamped status entry for a service.
#[derive(Debug, Clone)]
pub struct StatusEntry {
    pub status: ServiceStatus,
    pub updated_at: Instant,
}

/// Thread-safe registry for services to self-report their health status.
#[derive(Debug, Clone, Default)]
pub struct ServiceStatusRegistry {
    inner: Arc<DashMap<String, StatusEntry>>,
}

impl ServiceStatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or updates the status for a named service.
    pub fn set(&self, name: &str, status: ServiceStatus) {
        self.inner.insert(
            name.to_owned(),
            StatusEntry {
                status,
                updated_at: Instant::now(),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<ServiceStatus> {
        self.inner.get(name).map(|entry| entry.status.clone())
    }

    /// Snapshot of all service statuses, sorted by name.
    pub fn all(&self) -> Vec<(String, ServiceStatus)> {
        let mut all: Vec<_> = self
            .inner
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().status.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Seconds since the named service last reported.
    pub fn age_secs(&self, name: &str) -> Option<u64> {
        self.inner
            .get(name)
            .map(|entry| entry.updated_at.elapsed().as_secs())
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub risk: RiskService,
    pub service_statuses: ServiceStatusRegistry,
}

impl AppState {
    pub fn new(db_pool: PgPool, risk: RiskService) -> Self {
        Self {
            db_pool,
            risk,
            service_statuses: ServiceStatusRegistry::new(),
        }
    }
}
