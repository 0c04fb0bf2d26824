use std::time::{Duration, Instant};

/// Format a `Duration` with automatic unit scaling, e.g. `1.94ms` or `2.34s`.
pub fn fmt_duration(d: Duration) -> String {
    format!("{d:.2?}")
}

/// Warn if more than `threshold` has elapsed since `start`. Returns the elapsed time.
pub fn log_if_slow(start: Instant, threshold: Duration, operation: &str) -> Duration {
    let elapsed = start.elapsed();
    if elapsed > threshold {
        tracing::warn!(
            duration = fmt_duration(elapsed),
            threshold = fmt_duration(threshold),
            operation,
            "Slow operation"
        );
    }
    elapsed
}
