//! Subscriber setup

use crate::config::LoggingConfig;
use crate::utils::error::{HyperbatchError, Result};
use tracing_subscriber::EnvFilter;

/// Level filter for a configuration; `RUST_LOG` wins when it is set and valid
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    EnvFilter::try_new(&config.level).map_err(|e| {
        HyperbatchError::Config(format!("Invalid log level '{}': {}", config.level, e))
    })
}

/// Install a global fmt subscriber
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(config)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    let installed = if config.json {
        builder.json().with_current_span(true).try_init()
    } else {
        builder.with_file(true).with_line_number(true).try_init()
    };

    installed.map_err(|e| HyperbatchError::Config(format!("Failed to initialize logging: {}", e)))
}
