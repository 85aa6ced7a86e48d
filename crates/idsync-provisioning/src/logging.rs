//! Structured JSON logging setup using tracing.
//!
//! Embedders that already install a subscriber can skip this module; the
//! engine only emits `tracing` events and spans.

use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, util::TryInitError, EnvFilter,
};

/// Initialize the tracing subscriber with JSON logging.
///
/// `RUST_LOG` takes precedence over `filter`. An unparsable filter falls
/// back to `info`.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_logging(filter: &str) -> Result<(), TryInitError> {
    let filter_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .unwrap_or_else(|e| {
            eprintln!("Invalid log filter '{filter}': {e}, using 'info'");
            EnvFilter::new("info")
        });

    let fmt_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter_layer)
        .try_init()?;

    tracing::info!(filter = %filter, "Logging initialized");
    Ok(())
}

/// Initialize logging for tests (with simpler output).
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("debug")
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_test_logging_does_not_panic() {
        init_test_logging();
        init_test_logging();
    }
}
