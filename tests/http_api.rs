//! End-to-end requests through the router.

mod helpers;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use helpers::{row, seed, service};
use riskscore::risk::compute::compute_risk_score;
use riskscore::state::AppState;
use riskscore::web::create_router;
use serde_json::Value;
use sqlx::PgPool;
use tower::ServiceExt;

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn delete(country: &str, admin1: &str) -> Request<Body> {
    Request::builder()
        .method(Method::DELETE)
        .uri("/api/conflictdata")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            serde_json::json!({ "country": country, "admin1": admin1 }).to_string(),
        ))
        .unwrap()
}

#[sqlx::test]
async fn risk_score_lifecycle(pool: PgPool) {
    seed(&pool, &[row("Sudan", "Khartoum", 10, 3.0), row("Sudan", "Darfur", 20, 5.0)]).await;
    let (risk, scheduler) = service(&pool);
    let app = create_router(AppState::new(pool.clone(), risk.clone()));

    let (status, body) = send(&app, get("/api/conflictdata/Sudan/riskscore")).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["detail"], "calculating");
    assert_eq!(scheduler.count(), 1);

    compute_risk_score(risk.cache(), "sudan").await;

    let (status, body) = send(&app, get("/api/conflictdata/SUDAN/riskscore")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["countryNorm"], "sudan");
    assert_eq!(body["score"], 4.0);

    let (status, _) = send(&app, get("/api/conflictdata/Atlantis/riskscore")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[sqlx::test]
async fn risk_score_responses_are_not_cacheable(pool: PgPool) {
    seed(&pool, &[row("Chad", "Lac", 1, 1.0)]).await;
    let (risk, _scheduler) = service(&pool);
    let app = create_router(AppState::new(pool, risk));

    let response = app
        .oneshot(get("/api/conflictdata/chad/riskscore"))
        .await
        .unwrap();
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "private, no-store, must-revalidate"
    );
}

#[sqlx::test]
async fn listing_groups_rows_by_country(pool: PgPool) {
    seed(
        &pool,
        &[
            row("Chad", "Lac", 1, 1.0),
            row("Mali", "Gao", 2, 2.0),
            row("Mali", "Kidal", 3, 3.0),
        ],
    )
    .await;
    let (risk, _scheduler) = service(&pool);
    let app = create_router(AppState::new(pool, risk));

    let (status, body) = send(&app, get("/api/conflictdata?page=1&perPage=5")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["page"], 1);
    assert_eq!(body["perPage"], 5);
    let countries = body["countries"].as_array().unwrap();
    assert_eq!(countries.len(), 2);
    assert_eq!(countries[1]["countryRaw"], "Mali");
    assert_eq!(countries[1]["rows"].as_array().unwrap().len(), 2);

    let (status, body) = send(&app, get("/api/conflictdata/mali")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (status, body) = send(&app, get("/api/conflictdata/atlantis")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[sqlx::test]
async fn delete_validates_and_invalidates(pool: PgPool) {
    seed(&pool, &[row("Sudan", "Khartoum", 10, 3.0)]).await;
    let (risk, _scheduler) = service(&pool);
    risk.cache().ensure_entry("sudan").await.unwrap();
    risk.cache().mark_ready("sudan", 3.0).await.unwrap();
    let app = create_router(AppState::new(pool.clone(), risk.clone()));

    let (status, body) = send(&app, delete("", "Khartoum")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");

    let (status, _) = send(&app, delete("Sudan", "Nowhere")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, delete("Sudan", "Khartoum")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["detail"], "deleted");

    let (status, _) = send(&app, get("/api/conflictdata/Sudan/riskscore")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[sqlx::test]
async fn health_and_status(pool: PgPool) {
    let (risk, _scheduler) = service(&pool);
    let state = AppState::new(pool, risk);
    state
        .service_statuses
        .set("web", riskscore::state::ServiceStatus::Active);
    let app = create_router(state);

    let (status, body) = send(&app, get("/api/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = send(&app, get("/api/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["database"], "active");
    assert_eq!(body["status"], "active");
    assert_eq!(body["services"]["web"]["status"], "active");
}
