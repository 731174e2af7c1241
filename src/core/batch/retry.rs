//! Retry policy math
//!
//! Backoff is exponential in the retry index, capped at `max_delay`, with
//! symmetric jitter of up to `jitter_factor` of the capped delay. A
//! `max_delay` below `base_delay` makes every retry wait `max_delay`.

use super::failure::BatchFailure;
use super::types::RetryOptions;
use rand::Rng;
use std::time::Duration;

impl RetryOptions {
    /// Check the policy for out-of-range values
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("Retry max attempts must be at least 1".to_string());
        }

        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(format!(
                "Retry jitter factor must be within [0, 1], got {}",
                self.jitter_factor
            ));
        }

        Ok(())
    }

    /// Delay before the retry with the given index
    ///
    /// Index 0 is the first retry, i.e. the second overall attempt.
    pub fn backoff_delay<G: Rng + ?Sized>(&self, attempt: u32, rng: &mut G) -> Duration {
        if self.max_attempts <= 1 {
            return Duration::ZERO;
        }

        let base_ns = self.base_delay.as_nanos() as f64;
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let exponential = base_ns * 2f64.powi(exponent);
        let capped = exponential.min(self.max_delay.as_nanos() as f64);
        let jitter = if self.jitter_factor > 0.0 {
            capped * self.jitter_factor * rng.gen_range(-1.0..=1.0)
        } else {
            0.0
        };

        let delay_ns = (capped + jitter).max(0.0);
        Duration::from_nanos(delay_ns.round() as u64)
    }

    /// Whether another attempt is allowed after `attempts_made` attempts
    pub fn should_retry(&self, failure: &BatchFailure, attempts_made: u32) -> bool {
        failure.retryable && attempts_made < self.max_attempts
    }
}
