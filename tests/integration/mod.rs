//! Integration tests for hyperbatch
//!
//! These tests verify scheduler behavior through its public API using
//! real handlers; `handler_mock_tests` uses mockall expectations.

pub mod config_tests;
pub mod failure_tests;
pub mod handler_mock_tests;
