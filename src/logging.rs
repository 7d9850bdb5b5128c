//! Tracing subscriber setup.
//! `RUST_LOG` wins over the configured level; JSON output for production.

use tracing_subscriber::EnvFilter;

use crate::config::LogFormat;

/// Initialize the global subscriber. Safe to call more than once (later calls are ignored).
pub fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = match format {
        LogFormat::Json => builder.json().with_current_span(true).try_init(),
        LogFormat::Pretty => builder.with_thread_ids(true).try_init(),
    };

    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
