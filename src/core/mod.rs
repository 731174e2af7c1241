//! Core functionality
//!
//! This module contains the batching engine.

pub mod batch;
