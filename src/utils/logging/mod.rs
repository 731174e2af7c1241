//! Logging utilities
//!
//! The engine only emits `tracing` events; installing a subscriber is left to
//! the application. [`init_logging`] is a ready-made one.

mod utils;

pub use utils::{build_filter, init_logging};
