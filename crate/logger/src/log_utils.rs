use std::sync::Once;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static LOG_INIT: Once = Once::new();

/// Install the global tracing subscriber, once per process.
///
/// The filter is read from `RUST_LOG`; when the variable is not set, `default_filter`
/// (e.g. `"info,pki_hsm_signer=debug"`) is used instead.
/// Later calls are no-ops, which lets every test call it freely.
pub fn log_init(default_filter: &str) {
    LOG_INIT.call_once(|| {
        // another subscriber may already have been installed by the host application
        drop(try_log_init(default_filter));
    });
}

/// Install the global tracing subscriber and report whether it succeeded.
///
/// # Errors
///
/// Fails when a global subscriber has already been set.
pub fn try_log_init(default_filter: &str) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|e| format!("invalid log filter '{default_filter}': {e}"))?;

    let format = tracing_subscriber::fmt::layer()
        .with_level(true)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false)
        .compact();

    tracing_subscriber::registry()
        .with(filter)
        .with(format)
        .try_init()
        .map_err(|e| format!("failed installing the tracing subscriber: {e}"))
}
