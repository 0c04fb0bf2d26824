//! Conflict data and risk score HTTP handlers.

use std::collections::HashMap;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::data::conflicts::{self, ConflictRow};
use crate::data::normalize::normalize;
use crate::risk::RiskLookup;
use crate::state::AppState;
use crate::web::error::{ApiError, db_error};

/// Maximum length of the raw country/region names accepted on delete.
const MAX_NAME_LEN: usize = 50;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub page: Option<i64>,
    #[serde(alias = "per_page")]
    pub per_page: Option<i64>,
}

#[derive(Debug, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ConflictRowResponse {
    pub admin1_raw: String,
    pub population: Option<i64>,
    pub events: i32,
    pub score: f64,
}

impl From<ConflictRow> for ConflictRowResponse {
    fn from(row: ConflictRow) -> Self {
        Self {
            admin1_raw: row.admin1_raw,
            population: row.population,
            events: row.events,
            score: row.score,
        }
    }
}

#[derive(Debug, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CountryGroupResponse {
    pub country_raw: String,
    pub rows: Vec<ConflictRowResponse>,
}

#[derive(Debug, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ConflictPageResponse {
    pub page: i64,
    pub per_page: i64,
    pub countries: Vec<CountryGroupResponse>,
}

#[derive(Debug, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct RiskScoreResponse {
    pub country_norm: String,
    pub score: f64,
}

#[derive(Debug, Serialize, TS)]
#[ts(export)]
pub struct DetailResponse {
    pub detail: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteConflictRequest {
    pub country: String,
    pub admin1: String,
}

impl DeleteConflictRequest {
    fn validate(&self) -> Result<(), ApiError> {
        for (field, value) in [("country", &self.country), ("admin1", &self.admin1)] {
            let len = value.chars().count();
            if len == 0 || len > MAX_NAME_LEN {
                return Err(ApiError::bad_request(format!(
                    "{field} must be 1-{MAX_NAME_LEN} characters"
                )));
            }
        }
        Ok(())
    }
}

/// Map a risk lookup to its HTTP response: 200 with the score, 202 while
/// computing, 404 for an unknown country.
pub fn lookup_response(country: &str, lookup: RiskLookup) -> Response {
    match lookup {
        RiskLookup::Found(score) => Json(RiskScoreResponse {
            country_norm: normalize(country),
            score,
        })
        .into_response(),
        RiskLookup::Pending => (
            StatusCode::ACCEPTED,
            Json(DetailResponse {
                detail: "calculating".to_owned(),
            }),
        )
            .into_response(),
        RiskLookup::NotFound => ApiError::not_found("country not found").into_response(),
    }
}

/// `GET /api/conflictdata`
pub async fn list_conflicts(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ConflictPageResponse>, ApiError> {
    let (page, per_page) = conflicts::clamp_page(params.page, params.per_page);

    let countries = conflicts::list_country_page(&state.db_pool, page, per_page)
        .await
        .map_err(|e| db_error("List countries", e))?;
    let norms: Vec<String> = countries.iter().map(|c| c.country_norm.clone()).collect();
    let rows = conflicts::rows_for_countries(&state.db_pool, &norms)
        .await
        .map_err(|e| db_error("List conflict rows", e))?;

    let mut grouped: HashMap<String, Vec<ConflictRowResponse>> = HashMap::new();
    for row in rows {
        grouped
            .entry(row.country_norm.clone())
            .or_default()
            .push(row.into());
    }

    let countries = countries
        .into_iter()
        .map(|c| CountryGroupResponse {
            rows: grouped.remove(&c.country_norm).unwrap_or_default(),
            country_raw: c.country_raw,
        })
        .collect();

    Ok(Json(ConflictPageResponse {
        page,
        per_page,
        countries,
    }))
}

/// `GET /api/conflictdata/{country}`
pub async fn get_country(
    State(state): State<AppState>,
    Path(country): Path<String>,
) -> Result<Json<Vec<ConflictRowResponse>>, ApiError> {
    let rows = conflicts::rows_for_country(&state.db_pool, &country)
        .await
        .map_err(|e| db_error("Get country", e))?;
    if rows.is_empty() {
        return Err(ApiError::not_found("country not found"));
    }
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

/// `GET /api/conflictdata/{country}/riskscore`
pub async fn get_risk_score(
    State(state): State<AppState>,
    Path(country): Path<String>,
) -> Result<Response, ApiError> {
    let lookup = state.risk.get_status_or_schedule(&country).await?;
    Ok(lookup_response(&country, lookup))
}

/// `DELETE /api/conflictdata`
pub async fn delete_conflict(
    State(state): State<AppState>,
    Json(body): Json<DeleteConflictRequest>,
) -> Result<Json<DetailResponse>, ApiError> {
    body.validate()?;

    if !state.risk.delete_conflict(&body.country, &body.admin1).await? {
        return Err(ApiError::not_found("conflict_data row not found"));
    }
    Ok(Json(DetailResponse {
        detail: "deleted".to_owned(),
    }))
}
