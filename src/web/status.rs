//! Health and status handlers.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::response::Json;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::trace;
use ts_rs::TS;

use crate::state::{AppState, ServiceStatus};

#[derive(Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ServiceInfo {
    name: String,
    status: ServiceStatus,
    seconds_since_update: Option<u64>,
}

#[derive(Serialize, TS)]
#[ts(export)]
pub struct StatusResponse {
    status: ServiceStatus,
    database: ServiceStatus,
    version: String,
    commit: String,
    services: BTreeMap<String, ServiceInfo>,
}

/// Overall status: any error wins, otherwise active if every service is.
fn overall_status<'a>(statuses: impl IntoIterator<Item = &'a ServiceStatus>) -> ServiceStatus {
    let mut any = false;
    let mut all_active = true;
    for status in statuses {
        any = true;
        match status {
            ServiceStatus::Error => return ServiceStatus::Error,
            ServiceStatus::Active => {}
            _ => all_active = false,
        }
    }
    match (any, all_active) {
        (false, _) => ServiceStatus::Disabled,
        (true, true) => ServiceStatus::Active,
        (true, false) => ServiceStatus::Starting,
    }
}

/// Health check endpoint
pub(super) async fn health() -> Json<Value> {
    trace!("health check requested");
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Status endpoint showing background service and database health
pub(super) async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let mut services = BTreeMap::new();
    for (name, svc_status) in state.service_statuses.all() {
        let seconds_since_update = state.service_statuses.age_secs(&name);
        services.insert(
            name.clone(),
            ServiceInfo {
                name,
                status: svc_status,
                seconds_since_update,
            },
        );
    }

    let database = match crate::data::health::ping(&state.db_pool).await {
        Ok(()) => ServiceStatus::Active,
        Err(e) => {
            tracing::warn!(error = ?e, "Database ping failed");
            ServiceStatus::Error
        }
    };

    let status = overall_status(
        services
            .values()
            .map(|s| &s.status)
            .chain(std::iter::once(&database)),
    );

    Json(StatusResponse {
        status,
        database,
        version: env!("CARGO_PKG_VERSION").to_string(),
        commit: env!("GIT_COMMIT_HASH").to_string(),
        services,
    })
}
