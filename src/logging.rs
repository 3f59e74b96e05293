//! Logging setup: tracing fmt layer with an env-overridable filter.

use tracing_subscriber::EnvFilter;

/// Initializes the global subscriber. `RUST_LOG` takes precedence over the
/// configured level.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
