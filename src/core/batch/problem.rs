//! Problems and per-request outcomes

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Stable problem codes produced by the engine
pub mod codes {
    pub const QUEUE_FULL: &str = "hyperbatch.queue_full";
    pub const INVALID_RESULT_COUNT: &str = "hyperbatch.invalid_result_count";
    pub const BATCH_FAILED: &str = "hyperbatch.batch_failed";
    pub const VALIDATION_FAILED: &str = "hyperbatch.validation_failed";
}

/// Description of a failure delivered to a caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{code}: {description}")]
pub struct Problem {
    /// Stable, machine-readable code
    pub code: String,
    /// Human-readable description
    pub description: String,
    /// Optional structured context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<BTreeMap<String, String>>,
}

impl Problem {
    /// Create a problem without details
    pub fn new(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            description: description.into(),
            details: None,
        }
    }

    /// Attach one detail entry
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Whether this problem carries the given code
    pub fn has_code(&self, code: &str) -> bool {
        self.code == code
    }
}

/// Constructors for the standard problems
pub mod problems {
    use super::{Problem, codes};

    /// The queue is at capacity and rejects new requests
    pub fn queue_full() -> Problem {
        Problem::new(codes::QUEUE_FULL, "Hyperbatch queue is full.")
    }

    /// The handler broke the one-result-per-request contract
    pub fn invalid_result_count(expected: usize, actual: usize) -> Problem {
        Problem::new(
            codes::INVALID_RESULT_COUNT,
            format!(
                "Batch handler returned {} results for {} requests.",
                actual, expected
            ),
        )
        .with_detail("expected", expected.to_string())
        .with_detail("actual", actual.to_string())
    }

    /// Generic batch failure
    pub fn batch_failed(description: impl Into<String>) -> Problem {
        Problem::new(codes::BATCH_FAILED, description)
    }

    /// A request did not pass validation
    pub fn validation_failed(description: impl Into<String>) -> Problem {
        Problem::new(codes::VALIDATION_FAILED, description)
    }
}

/// Per-request value produced by a batch handler
pub type Outcome<R> = std::result::Result<R, Problem>;

/// What a caller observes when its request does not succeed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// The request or its batch failed
    #[error("request failed: {0}")]
    Failed(Problem),
    /// The caller's cancellation fired before a result was delivered
    #[error("request was cancelled")]
    Cancelled,
}

impl RequestError {
    /// The problem, if this is a failure
    pub fn problem(&self) -> Option<&Problem> {
        match self {
            Self::Failed(problem) => Some(problem),
            Self::Cancelled => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<Problem> for RequestError {
    fn from(problem: Problem) -> Self {
        Self::Failed(problem)
    }
}
