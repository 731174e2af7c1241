//! Retry configuration

use super::*;
use crate::core::batch::RetryOptions;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy for failed batches
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Attempts including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff base delay in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Backoff cap in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Relative jitter in `[0, 1]`
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

impl RetryConfig {
    pub fn to_options(&self) -> RetryOptions {
        RetryOptions::default()
            .with_max_attempts(self.max_attempts)
            .with_base_delay(Duration::from_millis(self.base_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_jitter_factor(self.jitter_factor)
    }

    /// Merge retry configurations; non-default values in `other` win
    pub fn merge(mut self, other: Self) -> Self {
        if other.max_attempts != default_max_attempts() {
            self.max_attempts = other.max_attempts;
        }
        if other.base_delay_ms != default_base_delay_ms() {
            self.base_delay_ms = other.base_delay_ms;
        }
        if other.max_delay_ms != default_max_delay_ms() {
            self.max_delay_ms = other.max_delay_ms;
        }
        if other.jitter_factor != default_jitter_factor() {
            self.jitter_factor = other.jitter_factor;
        }
        self
    }
}
