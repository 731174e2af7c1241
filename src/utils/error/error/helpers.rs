//! Helper functions for creating specific error types

use super::types::HyperbatchError;

/// Helper functions for creating specific errors
impl HyperbatchError {
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation(message.into())
    }

    /// Whether the error means no more work can be submitted
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ShutDown | Self::QueueStopped)
    }
}
