//! Error handling for hyperbatch
//!
//! This module defines all error types surfaced synchronously to callers.
//! Failures that happen while a batch executes never use these types; they
//! are delivered per request as a [`crate::core::batch::RequestError`].

mod helpers;
mod types;

// Re-export all public types
pub use types::{HyperbatchError, Result};
