//! Error types for hyperbatch

use thiserror::Error;

/// Result type alias for hyperbatch
pub type Result<T> = std::result::Result<T, HyperbatchError>;

/// Main error type for hyperbatch
#[derive(Error, Debug)]
pub enum HyperbatchError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// The scheduler has been shut down and accepts no more requests
    #[error("Scheduler has been shut down")]
    ShutDown,

    /// The queue for this key has been stopped
    #[error("Queue has been stopped")]
    QueueStopped,

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
