//! Configuration data models
//!
//! This module defines the configuration structures used by the scheduler.

#![allow(missing_docs)]

pub mod logging;
pub mod queue;
pub mod retry;

// Re-export all configuration types
pub use logging::*;
pub use queue::*;
pub use retry::*;

/// Default latency budget in milliseconds
pub fn default_max_wait_ms() -> u64 {
    50
}

/// Default attempt limit (no retries)
pub fn default_max_attempts() -> u32 {
    1
}

/// Default backoff base delay in milliseconds
pub fn default_base_delay_ms() -> u64 {
    100
}

/// Default backoff cap in milliseconds
pub fn default_max_delay_ms() -> u64 {
    2_000
}

pub fn default_jitter_factor() -> f64 {
    0.2
}

pub fn default_log_level() -> String {
    "info".to_string()
}
