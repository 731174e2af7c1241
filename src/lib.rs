//! # Hyperbatch
//!
//! An in-process micro-batching scheduler. Callers submit individual requests
//! tagged with a compatibility key; requests sharing a key are grouped into
//! batches and handed to a single [`BatchHandler`] call.
//!
//! ## Features
//!
//! - **Flush triggers**: batch size, token budget, queue capacity, latency budget,
//!   per-request deadlines and a custom backpressure predicate
//! - **Failure recovery**: classified failures are retried with exponential
//!   backoff or bisected to isolate poison requests
//! - **Cancellation**: each request carries its own `CancellationToken`
//! - **Graceful shutdown**: pending requests are flushed before shutdown returns
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use hyperbatch::{BatchHandler, BatchRequest, Outcome, QueueOptions, Scheduler};
//! use std::time::Duration;
//!
//! struct Doubler;
//!
//! #[async_trait]
//! impl BatchHandler<String, u32, u32> for Doubler {
//!     async fn handle_batch(
//!         &self,
//!         _key: &String,
//!         requests: &[BatchRequest<u32>],
//!     ) -> anyhow::Result<Vec<Outcome<u32>>> {
//!         Ok(requests.iter().map(|r| Ok(r.payload * 2)).collect())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let scheduler = Scheduler::builder(Doubler)
//!         .default_options(
//!             QueueOptions::new()
//!                 .with_max_batch_size(32)
//!                 .with_max_wait_time(Duration::from_millis(5)),
//!         )
//!         .build()?;
//!
//!     let ticket = scheduler.submit("double".to_string(), 21)?;
//!     assert_eq!(ticket.await?, 42);
//!
//!     scheduler.shutdown().await;
//!     Ok(())
//! }
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_inception)]

pub mod config;
pub mod core;
pub mod utils;

// Re-export main types
pub use config::HyperbatchConfig;
pub use core::batch::{
    BatchFailure, BatchHandler, BatchRequest, BatchTicket, Clock, FailureClassifier, FailureKind,
    ManualClock, Outcome, Problem, QueueFullMode, QueueMetrics, QueueOptions, QueueStatsSnapshot,
    RequestError, RetryOptions, Scheduler, SchedulerBuilder, SystemClock, classify_error, codes,
    problems,
};
pub use utils::error::{HyperbatchError, Result};
pub use utils::logging::init_logging;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
