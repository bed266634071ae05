//! Logging bootstrap
//!
//! Installs the global `tracing` subscriber for binaries and tests that
//! embed the runtime. `RUST_LOG` takes precedence over the configured level.

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::EnvFilter;

use crate::runtime_config::LogSettings;

/// Install a fmt subscriber according to `settings`.
///
/// Fails if a global subscriber is already installed.
pub fn init(settings: &LogSettings) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&settings.level)
            .with_context(|| format!("Invalid log level directive '{}'", settings.level))?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true);

    let installed = if settings.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| anyhow!("Failed to install tracing subscriber: {e}"))
}

/// Like [`init`], but ignores an already-installed subscriber.
///
/// Intended for tests, where several cases race to install one.
pub fn try_init(settings: &LogSettings) {
    let _ = init(settings);
}
