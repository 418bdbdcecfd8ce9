//! Diagnostic logging setup.
//!
//! Diagnostics (skipped files, failed batches, retries, requests) go through
//! `tracing` to stderr so stdout stays reserved for command summaries.
//! The level comes from `RUST_LOG` and defaults to `info`.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info,sqlx=warn";

/// Build the env filter, falling back to [`DEFAULT_FILTER`] when `RUST_LOG`
/// is unset or invalid.
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber. `json` switches to one JSON object per line.
/// Calling it twice is a no-op.
pub fn init(json: bool) {
    let registry = tracing_subscriber::registry().with(env_filter());
    let result = if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
