//! # Telemetry
//!
//! Installs the global `tracing` subscriber from [`LoggingConfig`].

use crate::{
    config::{LogFormat, LoggingConfig},
    Error, Result,
};
use tracing_subscriber::EnvFilter;

/// Install the global subscriber.
///
/// `RUST_LOG`, when set, takes precedence over the configured level.
///
/// # Errors
///
/// Returns a configuration error if the level directive is invalid or a
/// global subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| Error::configuration(format!("Invalid log level: {e}")))?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let installed = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| Error::configuration(format!("Failed to install subscriber: {e}")))
}

/// Install a debug-level subscriber for tests, ignoring repeated calls.
pub fn try_init_for_tests() {
    tracing_subscriber::fmt().with_env_filter("debug").with_test_writer().try_init().ok();
}
