//! Queue configuration

use super::*;
use crate::core::batch::{QueueFullMode, QueueOptions};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Batching limits for a queue
///
/// Zero disables the corresponding limit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueConfig {
    /// Maximum requests per batch
    #[serde(default)]
    pub max_batch_size: usize,
    /// Maximum tokens per batch
    #[serde(default)]
    pub max_batch_tokens: usize,
    /// Maximum pending requests
    #[serde(default)]
    pub max_queue_size: usize,
    /// Latency budget in milliseconds
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
    /// Behavior at capacity
    #[serde(default)]
    pub queue_full_mode: QueueFullMode,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 0,
            max_batch_tokens: 0,
            max_queue_size: 0,
            max_wait_ms: default_max_wait_ms(),
            queue_full_mode: QueueFullMode::default(),
        }
    }
}

impl QueueConfig {
    /// Convert into engine options
    pub fn to_options(&self) -> QueueOptions {
        QueueOptions::new()
            .with_max_batch_size(self.max_batch_size)
            .with_max_batch_tokens(self.max_batch_tokens)
            .with_max_queue_size(self.max_queue_size)
            .with_max_wait_time(Duration::from_millis(self.max_wait_ms))
            .with_queue_full_mode(self.queue_full_mode)
    }

    /// Merge queue configurations; non-default values in `other` win
    pub fn merge(mut self, other: Self) -> Self {
        if other.max_batch_size != 0 {
            self.max_batch_size = other.max_batch_size;
        }
        if other.max_batch_tokens != 0 {
            self.max_batch_tokens = other.max_batch_tokens;
        }
        if other.max_queue_size != 0 {
            self.max_queue_size = other.max_queue_size;
        }
        if other.max_wait_ms != default_max_wait_ms() {
            self.max_wait_ms = other.max_wait_ms;
        }
        if other.queue_full_mode != QueueFullMode::default() {
            self.queue_full_mode = other.queue_full_mode;
        }
        self
    }
}

impl From<&QueueConfig> for QueueOptions {
    fn from(config: &QueueConfig) -> Self {
        config.to_options()
    }
}
