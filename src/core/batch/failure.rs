//! Classification of batch handler errors
//!
//! A handler signals a deliberate, classified failure by returning a
//! [`BatchFailure`] inside its `anyhow::Error`. Anything else is treated as a
//! transport failure and retried according to the retry policy.

use super::problem::{Problem, problems};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Category of a batch-level failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Malformed or invalid request
    Client,
    /// Upstream temporarily unavailable
    Transient,
    /// Connectivity or protocol failure
    Transport,
    /// Cannot be classified
    Unknown,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Client => "client",
            FailureKind::Transient => "transient",
            FailureKind::Transport => "transport",
            FailureKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// A classified batch failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} batch failure: {problem}")]
pub struct BatchFailure {
    /// Problem delivered to every affected request
    pub problem: Problem,
    /// Failure category
    pub kind: FailureKind,
    /// Whether the same batch may be attempted again
    pub retryable: bool,
    /// Whether the batch may be split to isolate the offending request
    pub bisectable: bool,
}

impl BatchFailure {
    /// Client failure; never retried, bisected only when asked for
    pub fn client(problem: Problem, bisectable: bool) -> Self {
        Self {
            problem,
            kind: FailureKind::Client,
            retryable: false,
            bisectable,
        }
    }

    /// Transient failure; retryable by default
    pub fn transient(problem: Problem) -> Self {
        Self {
            problem,
            kind: FailureKind::Transient,
            retryable: true,
            bisectable: false,
        }
    }

    /// Transport failure; retryable by default
    pub fn transport(problem: Problem) -> Self {
        Self {
            problem,
            kind: FailureKind::Transport,
            retryable: true,
            bisectable: false,
        }
    }

    /// Unknown failure; neither retried nor bisected
    pub fn unknown(problem: Problem) -> Self {
        Self {
            problem,
            kind: FailureKind::Unknown,
            retryable: false,
            bisectable: false,
        }
    }

    /// Override the retryable flag
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }
}

/// Maps a handler error to a classified failure
pub type FailureClassifier = Arc<dyn Fn(&anyhow::Error) -> BatchFailure + Send + Sync>;

/// Default classifier
///
/// A [`BatchFailure`] anywhere in the error chain is passed through unchanged.
pub fn classify_error(error: &anyhow::Error) -> BatchFailure {
    if let Some(failure) = error
        .chain()
        .find_map(|cause| cause.downcast_ref::<BatchFailure>())
    {
        return failure.clone();
    }

    BatchFailure::transport(problems::batch_failed(error.to_string()))
}

/// The default classifier as a shareable hook
pub fn default_classifier() -> FailureClassifier {
    Arc::new(classify_error)
}
