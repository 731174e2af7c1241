//! Utility modules
//!
//! - **error**: Crate error type and result alias
//! - **logging**: Subscriber setup for the engine's `tracing` events

pub mod error;
pub mod logging;

pub use logging::init_logging;
