//! Tracing initialization.
//!
//! Structured logging with the `tracing` and `tracing-subscriber`
//! crates. The level comes from the settings unless `RUST_LOG` is set,
//! which takes precedence through `EnvFilter`'s usual semantics.

use tracing_subscriber::{fmt, EnvFilter};

use crate::settings::Settings;

/// Initialize the global subscriber from the loaded settings. Returns an
/// error string if a subscriber is already installed.
pub fn init_from_settings(settings: &Settings) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.clone()));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| format!("failed to initialize tracing: {e}"))
}
