//! Application configuration, loaded from the environment with figment.

use figment::Figment;
use figment::providers::Env;
use serde::{Deserialize, Deserializer};
use std::path::PathBuf;
use std::time::Duration;

fn default_log_level() -> String {
    "info".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(8)
}

fn default_error_max_len() -> usize {
    2000
}

fn default_startup_reset_message() -> String {
    "startup reset from computing".to_string()
}

fn default_compute_concurrency() -> usize {
    4
}

fn default_compute_slow_threshold() -> Duration {
    Duration::from_secs(2)
}

/// Top-level configuration.
///
/// Keys are the lowercased environment variable names (`DATABASE_URL` ->
/// `database_url`). Risk cache settings are flattened into the same namespace.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Base log level for this crate when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub database_url: String,
    /// Grace period for in-flight work after a shutdown signal.
    #[serde(
        default = "default_shutdown_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub shutdown_timeout: Duration,
    /// CSV or JSON file used to seed `conflict_data` when the table is empty.
    #[serde(default)]
    pub seed_file: Option<PathBuf>,
    #[serde(flatten)]
    pub risk: RiskCacheConfig,
}

impl Config {
    /// Load from raw environment variables. `PORT` and `DATABASE_URL` are
    /// read as-is, with no prefix.
    pub fn from_env() -> Result<Self, figment::Error> {
        Figment::new().merge(Env::raw()).extract()
    }
}

/// Settings for the risk score cache and its background computations.
///
/// Passed explicitly into [`crate::data::risk_cache::RiskCache`] and
/// [`crate::risk::RiskService`] rather than read from globals.
#[derive(Debug, Clone, Deserialize)]
pub struct RiskCacheConfig {
    /// Maximum stored length (in characters) of `last_error`.
    #[serde(rename = "risk_error_max_len", default = "default_error_max_len")]
    pub error_max_len: usize,
    /// Diagnostic written to orphaned `computing` rows by the startup sweep.
    #[serde(
        rename = "risk_startup_reset_message",
        default = "default_startup_reset_message"
    )]
    pub startup_reset_message: String,
    /// Maximum number of computations running at once.
    #[serde(default = "default_compute_concurrency")]
    pub compute_concurrency: usize,
    #[serde(
        default = "default_compute_slow_threshold",
        deserialize_with = "deserialize_duration"
    )]
    pub compute_slow_threshold: Duration,
}

impl Default for RiskCacheConfig {
    fn default() -> Self {
        Self {
            error_max_len: default_error_max_len(),
            startup_reset_message: default_startup_reset_message(),
            compute_concurrency: default_compute_concurrency(),
            compute_slow_threshold: default_compute_slow_threshold(),
        }
    }
}

/// Accepts either a bare number of seconds or a duration string such as `"1.5s"` or `"2m"`.
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}

fn parse_duration(text: &str) -> Result<Duration, String> {
    let parsed = fundu::DurationParser::with_all_time_units()
        .parse(text.trim())
        .map_err(|e| format!("invalid duration {text:?}: {e}"))?;
    Duration::try_from(parsed).map_err(|e| format!("invalid duration {text:?}: {e}"))
}
