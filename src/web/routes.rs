//! Web API router construction.

use std::time::Duration;

use axum::Router;
use axum::http::HeaderValue;
use axum::response::Response;
use axum::routing::get;
use tower_http::compression::CompressionLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::web::{conflicts, status};

/// Cache-Control presets.
pub mod cache {
    /// Conflict data and risk scores change between polls and must never be cached.
    pub const NO_STORE: &str = "private, no-store, must-revalidate";
}

/// Creates the web server router.
pub fn create_router(app_state: AppState) -> Router {
    let risk_router = Router::new()
        .route(
            "/conflictdata/{country}/riskscore",
            get(conflicts::get_risk_score),
        )
        .route(
            "/conflictdata",
            get(conflicts::list_conflicts).delete(conflicts::delete_conflict),
        )
        .route("/conflictdata/{country}", get(conflicts::get_country))
        .layer(axum::middleware::map_response(
            |mut resp: Response| async move {
                resp.headers_mut().insert(
                    axum::http::header::CACHE_CONTROL,
                    HeaderValue::from_static(cache::NO_STORE),
                );
                resp
            },
        ))
        .with_state(app_state.clone());

    let api_router = Router::new()
        .route("/health", get(status::health))
        .route("/status", get(status::status))
        .with_state(app_state)
        .merge(risk_router);

    Router::new().nest("/api", api_router).layer((
        TraceLayer::new_for_http(),
        CompressionLayer::new().gzip(true),
        TimeoutLayer::new(Duration::from_secs(30)),
    ))
}
