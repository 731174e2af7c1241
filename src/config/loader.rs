//! Environment variable loading
//!
//! Every variable is optional; unset variables keep their defaults.

use super::HyperbatchConfig;
use crate::core::batch::QueueFullMode;
use crate::utils::error::{HyperbatchError, Result};
use std::str::FromStr;
use tracing::debug;

impl HyperbatchConfig {
    /// Build a configuration from a variable lookup
    ///
    /// `from_env` uses the process environment; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        debug!("Loading configuration from environment variables");

        let mut config = Self::default();

        // Queue configuration
        if let Some(size) = parse_var(&lookup, "HYPERBATCH_MAX_BATCH_SIZE", "max batch size")? {
            config.queue.max_batch_size = size;
        }
        if let Some(tokens) =
            parse_var(&lookup, "HYPERBATCH_MAX_BATCH_TOKENS", "max batch tokens")?
        {
            config.queue.max_batch_tokens = tokens;
        }
        if let Some(size) = parse_var(&lookup, "HYPERBATCH_MAX_QUEUE_SIZE", "max queue size")? {
            config.queue.max_queue_size = size;
        }
        if let Some(wait) = parse_var(&lookup, "HYPERBATCH_MAX_WAIT_MS", "max wait")? {
            config.queue.max_wait_ms = wait;
        }
        if let Some(mode) = lookup("HYPERBATCH_QUEUE_FULL_MODE") {
            config.queue.queue_full_mode = parse_queue_full_mode(&mode)?;
        }

        // Retry configuration
        if let Some(attempts) =
            parse_var(&lookup, "HYPERBATCH_RETRY_MAX_ATTEMPTS", "retry max attempts")?
        {
            config.retry.max_attempts = attempts;
        }
        if let Some(delay) =
            parse_var(&lookup, "HYPERBATCH_RETRY_BASE_DELAY_MS", "retry base delay")?
        {
            config.retry.base_delay_ms = delay;
        }
        if let Some(delay) = parse_var(&lookup, "HYPERBATCH_RETRY_MAX_DELAY_MS", "retry max delay")?
        {
            config.retry.max_delay_ms = delay;
        }
        if let Some(jitter) = parse_var(&lookup, "HYPERBATCH_RETRY_JITTER", "retry jitter")? {
            config.retry.jitter_factor = jitter;
        }

        // Logging configuration
        if let Some(level) = lookup("HYPERBATCH_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(json) = parse_var(&lookup, "HYPERBATCH_LOG_JSON", "log json flag")? {
            config.logging.json = json;
        }

        debug!("Configuration loaded from environment variables");
        Ok(config)
    }
}

fn parse_var<F, V>(lookup: &F, name: &str, what: &str) -> Result<Option<V>>
where
    F: Fn(&str) -> Option<String>,
    V: FromStr,
    V::Err: std::fmt::Display,
{
    lookup(name)
        .map(|raw| {
            raw.trim().parse().map_err(|e| {
                HyperbatchError::Config(format!("Invalid {} in {}: {}", what, name, e))
            })
        })
        .transpose()
}

fn parse_queue_full_mode(raw: &str) -> Result<QueueFullMode> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "flush" => Ok(QueueFullMode::Flush),
        "reject" => Ok(QueueFullMode::Reject),
        other => Err(HyperbatchError::Config(format!(
            "Invalid queue full mode: {}",
            other
        ))),
    }
}
