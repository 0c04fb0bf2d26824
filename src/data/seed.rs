//! One-shot import of the source dataset from a CSV or JSON seed file.

use std::path::Path;

use sqlx::PgPool;
use tracing::{error, info};

use crate::data::conflicts::{self, NewConflictRow};

#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("failed to read seed file {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse seed file {path}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to parse seed file {path}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },
    #[error("row {index} ({country}/{admin1}) has negative events: {events}")]
    NegativeEvents {
        index: usize,
        country: String,
        admin1: String,
        events: i32,
    },
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Seed file encoding, chosen by extension. Anything but `.csv` is read as JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedFormat {
    Csv,
    Json,
}

impl SeedFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => Self::Csv,
            _ => Self::Json,
        }
    }
}

/// Parse and validate seed rows.
///
/// CSV needs a header row with `country,admin1,population,events,score`; an
/// empty `population` cell is read as missing. JSON is an array of objects
/// with the same keys.
pub fn parse_rows(
    path: &str,
    format: SeedFormat,
    contents: &str,
) -> Result<Vec<NewConflictRow>, SeedError> {
    let rows: Vec<NewConflictRow> = match format {
        SeedFormat::Json => serde_json::from_str(contents).map_err(|source| SeedError::Parse {
            path: path.to_owned(),
            source,
        })?,
        SeedFormat::Csv => csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(contents.as_bytes())
            .into_deserialize()
            .collect::<Result<_, _>>()
            .map_err(|source| SeedError::Csv {
                path: path.to_owned(),
                source,
            })?,
    };

    if let Some((index, row)) = rows.iter().enumerate().find(|(_, r)| r.events < 0) {
        return Err(SeedError::NegativeEvents {
            index,
            country: row.country.clone(),
            admin1: row.admin1.clone(),
            events: row.events,
        });
    }

    Ok(rows)
}

/// Import `path` into `conflict_data` if the table is empty.
///
/// Returns the number of rows written; `0` when skipped because data already
/// exists or the file is missing.
pub async fn import_if_empty(pool: &PgPool, path: &Path) -> Result<u64, SeedError> {
    let existing = conflicts::count(pool).await?;
    if existing > 0 {
        info!(rows = existing, "Seed import skipped (conflict_data already has rows)");
        return Ok(0);
    }

    let path_str = path.display().to_string();
    if !path.exists() {
        error!(path = %path_str, "Seed import failed: file not found");
        return Ok(0);
    }

    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| SeedError::Read {
            path: path_str.clone(),
            source,
        })?;
    let rows = parse_rows(&path_str, SeedFormat::from_path(path), &contents)?;
    let inserted = conflicts::upsert_rows(pool, &rows).await?;

    info!(inserted, path = %path_str, "Seed import completed");
    Ok(inserted)
}
