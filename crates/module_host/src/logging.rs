//! Logging system setup
//!
//! Initializes the global `tracing` subscriber from the `[logging]` settings.

use crate::config::LoggingSettings;
use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the logging system
///
/// `RUST_LOG` takes precedence over the configured level when set.
///
/// # Arguments
/// * `settings` - Level and output format
///
/// # Returns
/// * `Result<()>` - Error if a global subscriber is already installed
pub fn setup_logging(settings: &LoggingSettings) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if settings.json_format {
        registry
            .with(fmt::layer().json().with_target(false).with_thread_names(true))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_thread_names(true))
            .try_init()
    };

    result.map_err(|e| anyhow!("Failed to initialize logging: {}", e))
}
