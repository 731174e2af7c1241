//! Micro-batching engine
//!
//! Requests tagged with a compatibility key accumulate in a per-key queue
//! and are handed to a [`BatchHandler`] together, trading a little latency
//! for throughput. Failed batches are retried with backoff or bisected to
//! isolate poison requests.

mod clock;
mod failure;
mod handler;
mod problem;
mod queue;
mod retry;
mod scheduler;
mod stats;
mod types;
mod work_item;


// Re-export all public types
pub use clock::{Clock, ManualClock, SystemClock};
pub use failure::{BatchFailure, FailureClassifier, FailureKind, classify_error, default_classifier};
pub use handler::BatchHandler;
pub use problem::{Outcome, Problem, RequestError, codes, problems};
pub use scheduler::{Scheduler, SchedulerBuilder};
pub use stats::{QueueStats, QueueStatsSnapshot};
pub use types::{
    BatchRequest, FlushPredicate, QueueFullMode, QueueMetrics, QueueOptions, QueueOptionsResolver,
    RetryOptions, TokenCounter,
};
pub use work_item::BatchTicket;
