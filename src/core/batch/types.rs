//! Batching types and data structures

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// A single request submitted for batching
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRequest<T> {
    /// Request payload handed to the batch handler
    pub payload: T,
    /// Explicit token count; takes precedence over any token counter
    pub token_count: Option<usize>,
    /// Absolute instant by which the request should be dispatched
    pub deadline: Option<Instant>,
}

impl<T> BatchRequest<T> {
    /// Create a request from a payload
    pub fn new(payload: T) -> Self {
        Self {
            payload,
            token_count: None,
            deadline: None,
        }
    }

    /// Set an explicit token count
    pub fn with_token_count(mut self, tokens: usize) -> Self {
        self.token_count = Some(tokens);
        self
    }

    /// Set a dispatch deadline
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Behavior when a queue reaches `max_queue_size`
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueueFullMode {
    /// Flush the pending batch to make room
    #[default]
    Flush,
    /// Reject the incoming request with a `queue_full` problem
    Reject,
}

/// Per-key batching policy
///
/// Zero disables the corresponding limit.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueOptions {
    /// Maximum number of requests per batch
    pub max_batch_size: usize,
    /// Maximum token budget per batch
    pub max_batch_tokens: usize,
    /// Maximum number of pending requests
    pub max_queue_size: usize,
    /// Maximum time the oldest pending request waits before a flush
    pub max_wait_time: Duration,
    /// Behavior when the queue is full
    pub queue_full_mode: QueueFullMode,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            max_batch_size: 0,
            max_batch_tokens: 0,
            max_queue_size: 0,
            max_wait_time: Duration::from_millis(50),
            queue_full_mode: QueueFullMode::Flush,
        }
    }
}

impl QueueOptions {
    /// Create default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the size trigger
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    /// Set the token budget
    pub fn with_max_batch_tokens(mut self, tokens: usize) -> Self {
        self.max_batch_tokens = tokens;
        self
    }

    /// Set the queue capacity
    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    /// Set the latency budget
    pub fn with_max_wait_time(mut self, wait: Duration) -> Self {
        self.max_wait_time = wait;
        self
    }

    /// Set the full-queue behavior
    pub fn with_queue_full_mode(mut self, mode: QueueFullMode) -> Self {
        self.queue_full_mode = mode;
        self
    }

    /// Whether token-based batching is enabled
    pub fn has_token_budget(&self) -> bool {
        self.max_batch_tokens > 0
    }
}

/// Retry policy for batch-level failures
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOptions {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Base delay for exponential backoff
    pub base_delay: Duration,
    /// Upper bound for a single backoff delay
    pub max_delay: Duration,
    /// Relative jitter in `[0, 1]` applied to each delay
    pub jitter_factor: f64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            jitter_factor: 0.2,
        }
    }
}

impl RetryOptions {
    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Set the attempt limit
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the base delay
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the maximum delay
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the jitter factor
    pub fn with_jitter_factor(mut self, factor: f64) -> Self {
        self.jitter_factor = factor;
        self
    }
}

/// Snapshot of a queue used for flush decisions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueMetrics {
    /// Number of pending requests
    pub queue_length: usize,
    /// Sum of pending token counts
    pub queued_tokens: usize,
    /// Enqueue instant of the oldest pending request
    pub oldest_enqueued_at: Option<Instant>,
    /// Earliest deadline among pending requests
    pub earliest_deadline: Option<Instant>,
}

impl QueueMetrics {
    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.queue_length == 0
    }
}

/// Computes the token weight of a request without an explicit count
pub type TokenCounter<T> = Arc<dyn Fn(&BatchRequest<T>) -> usize + Send + Sync>;

/// Custom backpressure trigger evaluated after every enqueue
pub type FlushPredicate = Arc<dyn Fn(&QueueMetrics) -> bool + Send + Sync>;

/// Resolves key-specific queue options at queue creation
pub type QueueOptionsResolver<K> = Arc<dyn Fn(&K) -> QueueOptions + Send + Sync>;
