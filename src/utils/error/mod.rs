//! Error handling utilities
//!
//! This module defines the crate-level error type returned by configuration
//! loading and by the synchronous half of the scheduler API.

pub mod error;

// Re-export commonly used types
pub use error::*;
