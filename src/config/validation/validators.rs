//! Validators for the configuration models

use super::trait_def::Validate;
use crate::config::models::*;
use crate::core::batch::QueueFullMode;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

impl Validate for QueueConfig {
    fn validate(&self) -> Result<(), String> {
        debug!("Validating queue configuration");

        if self.queue_full_mode == QueueFullMode::Reject && self.max_queue_size == 0 {
            return Err("Queue full mode 'reject' requires max_queue_size to be set".to_string());
        }

        if self.max_batch_size > 0
            && self.max_queue_size > 0
            && self.max_batch_size > self.max_queue_size
        {
            warn!(
                max_batch_size = self.max_batch_size,
                max_queue_size = self.max_queue_size,
                "max_batch_size exceeds max_queue_size, the size trigger can never fire"
            );
        }

        Ok(())
    }
}

impl Validate for RetryConfig {
    fn validate(&self) -> Result<(), String> {
        self.to_options().validate()
    }
}

impl Validate for LoggingConfig {
    /// Accepts anything `EnvFilter` does: a bare level or `target=level` directives
    fn validate(&self) -> Result<(), String> {
        EnvFilter::try_new(&self.level)
            .map(|_| ())
            .map_err(|e| format!("Invalid log filter '{}': {}", self.level, e))
    }
}
