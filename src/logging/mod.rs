use crate::cli::TracingFormat;
use crate::config::Config;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Build the default filter directive: quiet dependencies, crate at `log_level`.
///
/// `sqlx::query` follows `log_level` too, so statements logged at DEBUG by the
/// pool's connect options show up whenever the crate runs at `debug`.
fn default_directive(log_level: &str) -> String {
    format!("warn,riskscore={log_level},sqlx::query={log_level}")
}

/// Configure and initialize logging for the application.
pub fn setup_logging(config: &Config, tracing_format: TracingFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(&config.log_level)));

    match tracing_format {
        TracingFormat::Pretty => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_target(true).compact())
                .init();
        }
        TracingFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(true)
                        .json()
                        .flatten_event(true)
                        .with_current_span(true),
                )
                .init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directive_parses() {
        let directive = default_directive("debug");
        assert_eq!(directive, "warn,riskscore=debug,sqlx::query=debug");
        assert!(EnvFilter::try_new(directive).is_ok());
    }
}
