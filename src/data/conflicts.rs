//! Queries over the `conflict_data` source dataset.

use std::collections::HashMap;

use serde::Deserialize;
use sqlx::PgPool;

use crate::data::normalize::normalize;
use crate::data::risk_cache;

pub const DEFAULT_PER_PAGE: i64 = 20;
pub const MAX_PER_PAGE: i64 = 100;

/// A single source row: one region (admin1) of one country.
#[derive(sqlx::FromRow, Debug, Clone)]
pub struct ConflictRow {
    pub id: i32,
    pub country_raw: String,
    pub country_norm: String,
    pub admin1_raw: String,
    pub admin1_norm: String,
    pub population: Option<i64>,
    pub events: i32,
    pub score: f64,
}

/// A source row to insert, keyed by raw names.
#[derive(Debug, Clone, Deserialize)]
pub struct NewConflictRow {
    pub country: String,
    pub admin1: String,
    #[serde(default)]
    pub population: Option<i64>,
    pub events: i32,
    pub score: f64,
}

/// A country on a listing page: normalized key plus a display name.
#[derive(sqlx::FromRow, Debug, Clone, PartialEq, Eq)]
pub struct CountrySummary {
    pub country_norm: String,
    pub country_raw: String,
}

const ROW_SELECT: &str = "SELECT id, country_raw, country_norm, admin1_raw, admin1_norm, population, events, score \
     FROM conflict_data";

/// Clamp listing parameters: page is 1-based, per-page within `1..=MAX_PER_PAGE`.
pub fn clamp_page(page: Option<i64>, per_page: Option<i64>) -> (i64, i64) {
    let page = page.unwrap_or(1).max(1);
    let per_page = per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE);
    (page, per_page)
}

/// Whether at least one source row exists for the normalized country.
pub async fn country_exists(pool: &PgPool, country_norm: &str) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM conflict_data WHERE country_norm = $1)")
        .bind(country_norm)
        .fetch_one(pool)
        .await
}

/// Mean `score` over all rows for the normalized country, or `None` if there are no rows.
pub async fn mean_score(pool: &PgPool, country_norm: &str) -> Result<Option<f64>, sqlx::Error> {
    sqlx::query_scalar("SELECT AVG(score) FROM conflict_data WHERE country_norm = $1")
        .bind(country_norm)
        .fetch_one(pool)
        .await
}

/// One page of countries ordered by normalized name.
///
/// The display name is `MIN(country_raw)` within each group so the choice is
/// deterministic when raw spellings differ.
pub async fn list_country_page(
    pool: &PgPool,
    page: i64,
    per_page: i64,
) -> Result<Vec<CountrySummary>, sqlx::Error> {
    sqlx::query_as::<_, CountrySummary>(
        r#"
        SELECT country_norm, MIN(country_raw) AS country_raw
        FROM conflict_data
        GROUP BY country_norm
        ORDER BY country_norm ASC
        LIMIT $1 OFFSET $2
        "#,
    )
    .bind(per_page)
    .bind((page - 1) * per_page)
    .fetch_all(pool)
    .await
}

/// All rows for the given normalized countries, ordered by country then region.
pub async fn rows_for_countries(
    pool: &PgPool,
    country_norms: &[String],
) -> Result<Vec<ConflictRow>, sqlx::Error> {
    if country_norms.is_empty() {
        return Ok(Vec::new());
    }

    sqlx::query_as::<_, ConflictRow>(&format!(
        "{ROW_SELECT} WHERE country_norm = ANY($1) ORDER BY country_norm ASC, admin1_norm ASC"
    ))
    .bind(country_norms)
    .fetch_all(pool)
    .await
}

/// All rows for a country given by its raw name, ordered by region.
pub async fn rows_for_country(pool: &PgPool, country: &str) -> Result<Vec<ConflictRow>, sqlx::Error> {
    sqlx::query_as::<_, ConflictRow>(&format!(
        "{ROW_SELECT} WHERE country_norm = $1 ORDER BY admin1_norm ASC"
    ))
    .bind(normalize(country))
    .fetch_all(pool)
    .await
}

/// Delete one region row and invalidate the country's cached score.
///
/// Both happen in one transaction: either the row is gone and the cache entry
/// is stale, or nothing changed. Returns `false` if no such row existed.
pub async fn delete_row(pool: &PgPool, country: &str, admin1: &str) -> Result<bool, sqlx::Error> {
    let country_norm = normalize(country);
    let admin1_norm = normalize(admin1);

    let mut tx = pool.begin().await?;

    let deleted = sqlx::query(
        "DELETE FROM conflict_data WHERE country_norm = $1 AND admin1_norm = $2",
    )
    .bind(&country_norm)
    .bind(&admin1_norm)
    .execute(&mut *tx)
    .await?;

    if deleted.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    risk_cache::invalidate(&mut *tx, &country_norm).await?;
    tx.commit().await?;
    Ok(true)
}

/// Insert or update rows in one statement, keyed on the normalized `(country, admin1)` pair.
///
/// Later duplicates within `rows` win. Every touched country's cached score is
/// invalidated in the same transaction. Returns the number of rows written.
pub async fn upsert_rows(pool: &PgPool, rows: &[NewConflictRow]) -> Result<u64, sqlx::Error> {
    if rows.is_empty() {
        return Ok(0);
    }

    // ON CONFLICT DO UPDATE cannot touch the same row twice in one statement.
    let mut index: HashMap<(String, String), usize> = HashMap::with_capacity(rows.len());
    let mut unique: Vec<&NewConflictRow> = Vec::with_capacity(rows.len());
    for row in rows {
        let key = (normalize(&row.country), normalize(&row.admin1));
        match index.get(&key) {
            Some(&i) => unique[i] = row,
            None => {
                index.insert(key, unique.len());
                unique.push(row);
            }
        }
    }

    let country_raw: Vec<String> = unique.iter().map(|r| r.country.trim().to_owned()).collect();
    let country_norm: Vec<String> = unique.iter().map(|r| normalize(&r.country)).collect();
    let admin1_raw: Vec<String> = unique.iter().map(|r| r.admin1.trim().to_owned()).collect();
    let admin1_norm: Vec<String> = unique.iter().map(|r| normalize(&r.admin1)).collect();
    let population: Vec<Option<i64>> = unique.iter().map(|r| r.population).collect();
    let events: Vec<i32> = unique.iter().map(|r| r.events).collect();
    let score: Vec<f64> = unique.iter().map(|r| r.score).collect();

    let mut touched = country_norm.clone();
    touched.sort_unstable();
    touched.dedup();

    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        r#"
        INSERT INTO conflict_data
            (country_raw, country_norm, admin1_raw, admin1_norm, population, events, score)
        SELECT * FROM UNNEST(
            $1::varchar[], $2::varchar[], $3::varchar[], $4::varchar[],
            $5::bigint[], $6::int[], $7::double precision[]
        )
        ON CONFLICT (country_norm, admin1_norm) DO UPDATE
        SET country_raw = EXCLUDED.country_raw,
            admin1_raw = EXCLUDED.admin1_raw,
            population = EXCLUDED.population,
            events = EXCLUDED.events,
            score = EXCLUDED.score
        "#,
    )
    .bind(&country_raw)
    .bind(&country_norm)
    .bind(&admin1_raw)
    .bind(&admin1_norm)
    .bind(&population)
    .bind(&events)
    .bind(&score)
    .execute(&mut *tx)
    .await?;

    risk_cache::invalidate_many(&mut *tx, &touched).await?;
    tx.commit().await?;

    Ok(result.rows_affected())
}

/// Total number of source rows.
pub async fn count(pool: &PgPool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM conflict_data")
        .fetch_one(pool)
        .await
}
