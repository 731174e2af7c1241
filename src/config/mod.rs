//! Configuration management for the scheduler
//!
//! Configuration can come from a YAML file, from `HYPERBATCH_*` environment
//! variables, or be built in code. All sources are validated before use.

mod loader;
pub mod models;
pub mod validation;

pub use models::*;
pub use validation::Validate;

use crate::core::batch::QueueOptions;
use crate::utils::error::{HyperbatchError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HyperbatchConfig {
    /// Default queue limits
    #[serde(default)]
    pub queue: QueueConfig,
    /// Retry policy shared by all queues
    #[serde(default)]
    pub retry: RetryConfig,
    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Queue limits for specific keys, matched on the key's display form
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub overrides: HashMap<String, QueueConfig>,
}

impl HyperbatchConfig {
    /// Load configuration from a YAML file
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {:?}", path);

        let content = tokio::fs::read_to_string(path).await?;

        let config = Self::from_yaml_str(&content)?;

        debug!("Configuration loaded successfully");
        Ok(config)
    }

    /// Parse and validate YAML configuration
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        info!("Loading configuration from environment variables");

        let config = Self::from_lookup(|name| std::env::var(name).ok())?;

        config.validate()?;
        Ok(config)
    }

    /// Queue options for a key, honouring per-key overrides
    pub fn queue_options_for(&self, key: &str) -> QueueOptions {
        self.overrides
            .get(key)
            .unwrap_or(&self.queue)
            .to_options()
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        debug!("Validating configuration");

        self.queue
            .validate()
            .map_err(|e| HyperbatchError::validation(format!("Queue config error: {}", e)))?;

        for (key, queue) in &self.overrides {
            queue.validate().map_err(|e| {
                HyperbatchError::validation(format!("Queue override '{}' error: {}", key, e))
            })?;
        }

        self.retry
            .validate()
            .map_err(|e| HyperbatchError::validation(format!("Retry config error: {}", e)))?;

        self.logging
            .validate()
            .map_err(|e| HyperbatchError::validation(format!("Logging config error: {}", e)))?;

        debug!("Configuration validation completed");
        Ok(())
    }

    /// Merge with another configuration (other takes precedence)
    pub fn merge(mut self, other: Self) -> Self {
        self.queue = self.queue.merge(other.queue);
        self.retry = self.retry.merge(other.retry);
        self.logging = self.logging.merge(other.logging);
        self.overrides.extend(other.overrides);
        self
    }

    /// Convert to YAML string
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
