//! Scheduler: routes requests to per-key queues
//!
//! Queues are created lazily on first use of a key and live until shutdown.
//! Nothing is shared across keys except the key to queue map.

use super::clock::{Clock, SystemClock};
use super::failure::{FailureClassifier, default_classifier};
use super::handler::BatchHandler;
use super::queue::{MicroBatchQueue, QueueContext};
use super::stats::QueueStatsSnapshot;
use super::types::{
    BatchRequest, FlushPredicate, QueueMetrics, QueueOptions, QueueOptionsResolver, RetryOptions,
    TokenCounter,
};
use super::work_item::BatchTicket;
use crate::config::HyperbatchConfig;
use crate::utils::error::{HyperbatchError, Result};
use dashmap::DashMap;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, info, info_span};

/// Micro-batching scheduler
///
/// Cloning is not supported; share it behind an `Arc`.
pub struct Scheduler<K, T, R, S = ahash::RandomState> {
    queues: DashMap<K, Arc<MicroBatchQueue<K, T, R>>, S>,
    context: Arc<QueueContext<K, T, R>>,
    default_options: QueueOptions,
    resolver: Option<QueueOptionsResolver<K>>,
    shut_down: AtomicBool,
    span: Span,
}

impl<K, T, R, S> fmt::Debug for Scheduler<K, T, R, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("default_options", &self.default_options)
            .field("shut_down", &self.shut_down.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl<K, T, R> Scheduler<K, T, R>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    T: Send + Sync + 'static,
    R: Send + 'static,
{
    /// Start building a scheduler around a batch handler
    pub fn builder<H>(handler: H) -> SchedulerBuilder<K, T, R>
    where
        H: BatchHandler<K, T, R>,
    {
        SchedulerBuilder::new(handler)
    }
}

impl<K, T, R, S> Scheduler<K, T, R, S>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    T: Send + Sync + 'static,
    R: Send + 'static,
    S: BuildHasher + Clone,
{
    /// Submit a request under `key`
    ///
    /// Fails synchronously when the scheduler is shut down or the key's queue
    /// cannot be created. Every other failure, including a full queue in
    /// `Reject` mode, is delivered through the returned ticket.
    pub fn enqueue(
        &self,
        key: K,
        request: BatchRequest<T>,
        cancel: CancellationToken,
    ) -> Result<BatchTicket<R>> {
        if self.is_shut_down() {
            return Err(HyperbatchError::ShutDown);
        }

        let queue = self.queue_for(key)?;

        // Shutdown may have swept the map between the check and the insert.
        if self.is_shut_down() {
            return Err(HyperbatchError::ShutDown);
        }

        queue.enqueue(request, cancel)
    }

    /// Submit a bare payload with no token count, deadline or cancellation
    pub fn submit(&self, key: K, payload: T) -> Result<BatchTicket<R>> {
        self.enqueue(key, BatchRequest::new(payload), CancellationToken::new())
    }

    /// Drain every queue and stop accepting requests
    pub async fn shutdown(&self) {
        self.shutdown_with(CancellationToken::new()).await;
    }

    /// Drain every queue; if `cancel` fires first, in-flight batches resolve as cancelled
    pub async fn shutdown_with(&self, cancel: CancellationToken) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            debug!(parent: &self.span, "Scheduler already shut down");
            return;
        }

        let queues: Vec<_> = self
            .queues
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.queues.clear();

        info!(
            parent: &self.span,
            queues = queues.len(),
            "Shutting down scheduler"
        );

        futures::future::join_all(queues.iter().map(|queue| queue.stop(cancel.clone()))).await;

        info!(parent: &self.span, "Scheduler shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Number of live queues
    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    /// Current metrics for a key, if its queue exists
    pub fn metrics(&self, key: &K) -> Option<QueueMetrics> {
        self.queues.get(key).map(|queue| queue.metrics())
    }

    /// Counters for a key, if its queue exists
    pub fn stats(&self, key: &K) -> Option<QueueStatsSnapshot> {
        self.queues.get(key).map(|queue| queue.stats())
    }

    /// Options in effect for a key, if its queue exists
    pub fn queue_options(&self, key: &K) -> Option<QueueOptions> {
        self.queues.get(key).map(|queue| queue.options().clone())
    }

    fn queue_for(&self, key: K) -> Result<Arc<MicroBatchQueue<K, T, R>>> {
        if let Some(queue) = self.queues.get(&key) {
            return Ok(Arc::clone(queue.value()));
        }

        let entry = self.queues.entry(key.clone()).or_try_insert_with(|| {
            let options = match &self.resolver {
                Some(resolve) => resolve(&key),
                None => self.default_options.clone(),
            };
            debug!(parent: &self.span, key = ?key, ?options, "Creating queue");
            MicroBatchQueue::new(key.clone(), options, Arc::clone(&self.context), &self.span)
                .map(Arc::new)
        })?;

        Ok(Arc::clone(entry.value()))
    }
}

/// Builder for [`Scheduler`]
pub struct SchedulerBuilder<K, T, R, S = ahash::RandomState> {
    handler: Arc<dyn BatchHandler<K, T, R>>,
    default_options: QueueOptions,
    resolver: Option<QueueOptionsResolver<K>>,
    token_counter: Option<TokenCounter<T>>,
    flush_predicate: Option<FlushPredicate>,
    retry: RetryOptions,
    classifier: FailureClassifier,
    clock: Arc<dyn Clock>,
    span: Option<Span>,
    hasher: S,
}

impl<K, T, R> SchedulerBuilder<K, T, R>
where
    K: Send + Sync + 'static,
    T: Send + Sync + 'static,
    R: Send + 'static,
{
    pub fn new<H>(handler: H) -> Self
    where
        H: BatchHandler<K, T, R>,
    {
        Self::from_shared(Arc::new(handler))
    }

    /// Build around a handler that is already shared
    pub fn from_shared(handler: Arc<dyn BatchHandler<K, T, R>>) -> Self {
        Self {
            handler,
            default_options: QueueOptions::default(),
            resolver: None,
            token_counter: None,
            flush_predicate: None,
            retry: RetryOptions::default(),
            classifier: default_classifier(),
            clock: Arc::new(SystemClock),
            span: None,
            hasher: ahash::RandomState::new(),
        }
    }
}

impl<K, T, R, S> SchedulerBuilder<K, T, R, S>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    T: Send + Sync + 'static,
    R: Send + 'static,
    S: BuildHasher + Clone,
{
    pub fn default_options(mut self, options: QueueOptions) -> Self {
        self.default_options = options;
        self
    }

    /// Resolve options per key; consulted once when a key's queue is created
    pub fn options_resolver<F>(mut self, resolve: F) -> Self
    where
        F: Fn(&K) -> QueueOptions + Send + Sync + 'static,
    {
        self.resolver = Some(Arc::new(resolve));
        self
    }

    pub fn token_counter<F>(mut self, count: F) -> Self
    where
        F: Fn(&BatchRequest<T>) -> usize + Send + Sync + 'static,
    {
        self.token_counter = Some(Arc::new(count));
        self
    }

    /// Custom backpressure trigger, evaluated after the built-in ones
    pub fn flush_predicate<F>(mut self, should_flush: F) -> Self
    where
        F: Fn(&QueueMetrics) -> bool + Send + Sync + 'static,
    {
        self.flush_predicate = Some(Arc::new(should_flush));
        self
    }

    pub fn retry(mut self, retry: RetryOptions) -> Self {
        self.retry = retry;
        self
    }

    pub fn classifier<F>(mut self, classify: F) -> Self
    where
        F: Fn(&anyhow::Error) -> super::failure::BatchFailure + Send + Sync + 'static,
    {
        self.classifier = Arc::new(classify);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Parent span for all scheduler, queue and batch events
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Use a different hash strategy for keys
    pub fn with_hasher<S2>(self, hasher: S2) -> SchedulerBuilder<K, T, R, S2> {
        SchedulerBuilder {
            handler: self.handler,
            default_options: self.default_options,
            resolver: self.resolver,
            token_counter: self.token_counter,
            flush_predicate: self.flush_predicate,
            retry: self.retry,
            classifier: self.classifier,
            clock: self.clock,
            span: self.span,
            hasher,
        }
    }

    pub fn build(self) -> Result<Scheduler<K, T, R, S>> {
        self.retry.validate().map_err(HyperbatchError::config)?;

        if self.default_options.has_token_budget() && self.token_counter.is_none() {
            return Err(HyperbatchError::config(format!(
                "max_batch_tokens is {} but no token counter is configured",
                self.default_options.max_batch_tokens
            )));
        }

        let span = self
            .span
            .unwrap_or_else(|| info_span!("hyperbatch_scheduler"));

        let context = QueueContext {
            handler: self.handler,
            retry: self.retry,
            token_counter: self.token_counter,
            flush_predicate: self.flush_predicate,
            classifier: self.classifier,
            clock: self.clock,
        };

        Ok(Scheduler {
            queues: DashMap::with_hasher(self.hasher),
            context: Arc::new(context),
            default_options: self.default_options,
            resolver: self.resolver,
            shut_down: AtomicBool::new(false),
            span,
        })
    }
}

impl<K, T, R, S> SchedulerBuilder<K, T, R, S>
where
    K: Eq + Hash + Clone + fmt::Debug + fmt::Display + Send + Sync + 'static,
    T: Send + Sync + 'static,
    R: Send + 'static,
    S: BuildHasher + Clone,
{
    /// Apply a loaded configuration
    ///
    /// Per-key overrides are matched against the key's display form.
    pub fn from_config(self, config: &HyperbatchConfig) -> Self {
        let builder = self
            .default_options(config.queue.to_options())
            .retry(config.retry.to_options());

        if config.overrides.is_empty() {
            return builder;
        }

        let config = config.clone();
        builder.options_resolver(move |key: &K| config.queue_options_for(&key.to_string()))
    }
}
