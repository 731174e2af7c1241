//! Batch handler abstraction

use super::problem::Outcome;
use super::types::BatchRequest;
use async_trait::async_trait;

/// Processes a batch of requests that share a compatibility key
///
/// Implementations must return exactly one outcome per request, in request
/// order. A batch-level failure is reported by returning an error; wrap a
/// [`BatchFailure`](super::BatchFailure) in it to control retry and bisection.
#[async_trait]
pub trait BatchHandler<K, T, R>: Send + Sync + 'static {
    async fn handle_batch(
        &self,
        key: &K,
        requests: &[BatchRequest<T>],
    ) -> anyhow::Result<Vec<Outcome<R>>>;
}
