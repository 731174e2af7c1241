//! Per-key micro-batch queue
//!
//! A queue accumulates requests for one compatibility key and decides when to
//! flush them. Bookkeeping happens under a short synchronous lock; batch
//! execution happens outside it, one batch at a time per key.
//!
//! # Lifecycle
//!
//! - **Idle**: nothing pending, no timer armed
//! - **Accumulating**: requests pending, a flush timer may be armed
//! - **Flushing**: a dequeued batch runs through the retry/bisect loop while
//!   new requests accumulate into the next batch
//! - **Stopped**: terminal, enqueues are rejected
//!
//! # Flush triggers
//!
//! Checked after every enqueue, first match wins: batch size, token budget,
//! queue capacity (in `Flush` mode), then the custom backpressure predicate.
//! Otherwise a timer is armed for `oldest + max_wait_time`, pulled in to the
//! earliest request deadline. An armed timer only ever moves earlier.

use super::clock::Clock;
use super::failure::FailureClassifier;
use super::handler::BatchHandler;
use super::problem::{Outcome, Problem, problems};
use super::stats::{QueueStats, QueueStatsSnapshot};
use super::types::{
    BatchRequest, FlushPredicate, QueueFullMode, QueueMetrics, QueueOptions, RetryOptions,
    TokenCounter,
};
use super::work_item::{BatchTicket, CompletionSlot, WorkItem};
use crate::utils::error::{HyperbatchError, Result};
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, Span, debug, debug_span, error, info, warn};
use uuid::Uuid;

/// Collaborators shared by every queue of a scheduler
pub(crate) struct QueueContext<K, T, R> {
    pub(crate) handler: Arc<dyn BatchHandler<K, T, R>>,
    pub(crate) retry: RetryOptions,
    pub(crate) token_counter: Option<TokenCounter<T>>,
    pub(crate) flush_predicate: Option<FlushPredicate>,
    pub(crate) classifier: FailureClassifier,
    pub(crate) clock: Arc<dyn Clock>,
}

/// Why a batch left the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlushReason {
    BatchSize,
    BatchTokens,
    QueueCapacity,
    Backpressure,
    TokenOverflow,
    Timer,
    Stop,
}

impl FlushReason {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            FlushReason::BatchSize => "max_batch_size",
            FlushReason::BatchTokens => "max_batch_tokens",
            FlushReason::QueueCapacity => "max_queue_size",
            FlushReason::Backpressure => "backpressure",
            FlushReason::TokenOverflow => "token_overflow",
            FlushReason::Timer => "timer",
            FlushReason::Stop => "stop",
        }
    }
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The drain cancellation fired while a batch was executing
#[derive(Debug)]
struct DrainCancelled;

/// Armed single-shot flush timer
struct FlushTimer {
    id: u64,
    deadline: Instant,
    handle: JoinHandle<()>,
}

/// Pending items plus the aggregates derived from them
struct QueueState<T, R> {
    pending: Vec<WorkItem<T, R>>,
    queued_tokens: usize,
    oldest_enqueued_at: Option<Instant>,
    earliest_deadline: Option<Instant>,
    timer: Option<FlushTimer>,
    next_timer_id: u64,
    stopped: bool,
}

impl<T, R> QueueState<T, R> {
    fn new() -> Self {
        Self {
            pending: Vec::new(),
            queued_tokens: 0,
            oldest_enqueued_at: None,
            earliest_deadline: None,
            timer: None,
            next_timer_id: 0,
            stopped: false,
        }
    }

    fn push(&mut self, item: WorkItem<T, R>) {
        self.queued_tokens += item.tokens();
        self.oldest_enqueued_at = min_instant(self.oldest_enqueued_at, Some(item.enqueued_at()));
        self.earliest_deadline = min_instant(self.earliest_deadline, item.deadline());
        self.pending.push(item);
    }

    fn recalculate(&mut self) {
        self.queued_tokens = self.pending.iter().map(WorkItem::tokens).sum();
        self.oldest_enqueued_at = self.pending.iter().map(WorkItem::enqueued_at).min();
        self.earliest_deadline = self.pending.iter().filter_map(WorkItem::deadline).min();
    }

    /// Remove items whose caller already cancelled
    fn take_cancelled(&mut self) -> Vec<WorkItem<T, R>> {
        if !self.pending.iter().any(WorkItem::is_cancelled) {
            return Vec::new();
        }

        let (cancelled, active): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(WorkItem::is_cancelled);
        self.pending = active;
        self.recalculate();
        cancelled
    }

    fn metrics(&self) -> QueueMetrics {
        QueueMetrics {
            queue_length: self.pending.len(),
            queued_tokens: self.queued_tokens,
            oldest_enqueued_at: self.oldest_enqueued_at,
            earliest_deadline: self.earliest_deadline,
        }
    }

    fn disarm_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.handle.abort();
        }
    }

    /// Dequeue everything pending and disarm the timer
    fn take_batch(&mut self) -> Vec<WorkItem<T, R>> {
        self.disarm_timer();
        self.queued_tokens = 0;
        self.oldest_enqueued_at = None;
        self.earliest_deadline = None;
        std::mem::take(&mut self.pending)
    }
}

fn min_instant(left: Option<Instant>, right: Option<Instant>) -> Option<Instant> {
    match (left, right) {
        (Some(l), Some(r)) => Some(l.min(r)),
        (l, r) => l.or(r),
    }
}

fn fail_all<R>(count: usize, problem: &Problem) -> Vec<Outcome<R>> {
    (0..count).map(|_| Err(problem.clone())).collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| message.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Evaluate the flush triggers in priority order
pub(crate) fn flush_trigger(
    options: &QueueOptions,
    predicate: Option<&FlushPredicate>,
    metrics: &QueueMetrics,
) -> Option<FlushReason> {
    if options.max_batch_size > 0 && metrics.queue_length >= options.max_batch_size {
        return Some(FlushReason::BatchSize);
    }

    if options.max_batch_tokens > 0 && metrics.queued_tokens >= options.max_batch_tokens {
        return Some(FlushReason::BatchTokens);
    }

    if options.max_queue_size > 0
        && metrics.queue_length >= options.max_queue_size
        && options.queue_full_mode == QueueFullMode::Flush
    {
        return Some(FlushReason::QueueCapacity);
    }

    if predicate.is_some_and(|should_flush| should_flush(metrics)) {
        return Some(FlushReason::Backpressure);
    }

    None
}

/// Instant at which the pending batch must be flushed
pub(crate) fn next_flush_at(
    options: &QueueOptions,
    metrics: &QueueMetrics,
    now: Instant,
) -> Option<Instant> {
    if metrics.is_empty() {
        return None;
    }

    let wait_until = if options.max_wait_time.is_zero() {
        Some(now)
    } else {
        metrics
            .oldest_enqueued_at
            .and_then(|oldest| oldest.checked_add(options.max_wait_time))
    };

    min_instant(wait_until, metrics.earliest_deadline)
}

/// Accumulation and dispatch engine for one compatibility key
pub(crate) struct MicroBatchQueue<K, T, R> {
    key: K,
    options: QueueOptions,
    context: Arc<QueueContext<K, T, R>>,
    state: Mutex<QueueState<T, R>>,
    in_flight: tokio::sync::Mutex<()>,
    abort: CancellationToken,
    tasks: TaskTracker,
    stats: QueueStats,
    span: Span,
}

impl<K, T, R> MicroBatchQueue<K, T, R>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    T: Send + Sync + 'static,
    R: Send + 'static,
{
    /// Create a queue; a token budget without any way to count tokens is rejected
    pub(crate) fn new(
        key: K,
        options: QueueOptions,
        context: Arc<QueueContext<K, T, R>>,
        parent: &Span,
    ) -> Result<Self> {
        if options.has_token_budget() && context.token_counter.is_none() {
            return Err(HyperbatchError::config(format!(
                "max_batch_tokens is {} for key {:?} but no token counter is configured",
                options.max_batch_tokens, key
            )));
        }

        let span = debug_span!(parent: parent, "queue", key = ?key);

        Ok(Self {
            key,
            options,
            context,
            state: Mutex::new(QueueState::new()),
            in_flight: tokio::sync::Mutex::new(()),
            abort: CancellationToken::new(),
            tasks: TaskTracker::new(),
            stats: QueueStats::default(),
            span,
        })
    }

    pub(crate) fn options(&self) -> &QueueOptions {
        &self.options
    }

    pub(crate) fn metrics(&self) -> QueueMetrics {
        self.state.lock().metrics()
    }

    pub(crate) fn stats(&self) -> QueueStatsSnapshot {
        self.stats.snapshot()
    }

    /// Add a request and flush or arm the timer as the triggers dictate
    ///
    /// Must be called from within a Tokio runtime.
    pub(crate) fn enqueue(
        self: &Arc<Self>,
        request: BatchRequest<T>,
        cancel: CancellationToken,
    ) -> Result<BatchTicket<R>> {
        let _entered = self.span.enter();
        let now = self.context.clock.now();

        if cancel.is_cancelled() {
            // Dropping the item resolves the ticket as cancelled.
            let (_item, ticket) = WorkItem::new(request, 0, now, cancel);
            debug!("Request cancelled before enqueue");
            return Ok(ticket);
        }

        let mut flushes = Vec::new();
        let ticket = {
            let mut state = self.state.lock();
            if state.stopped {
                return Err(HyperbatchError::QueueStopped);
            }

            for mut item in state.take_cancelled() {
                self.stats.record_settled(item.cancel());
            }

            if self.options.max_queue_size > 0
                && state.pending.len() >= self.options.max_queue_size
                && self.options.queue_full_mode == QueueFullMode::Reject
            {
                let (mut item, ticket) = WorkItem::new(request, 0, now, cancel);
                warn!(
                    queue_length = state.pending.len(),
                    max_queue_size = self.options.max_queue_size,
                    "Queue full, rejecting request"
                );
                item.settle(Err(problems::queue_full()));
                self.stats.record_rejected();
                return Ok(ticket);
            }

            let tokens = self.resolve_tokens(&request)?;
            let budget = self.options.max_batch_tokens;

            if budget > 0 && !state.pending.is_empty() && state.queued_tokens + tokens > budget {
                let batch = state.take_batch();
                debug!(
                    batch_size = batch.len(),
                    tokens = batch.iter().map(WorkItem::tokens).sum::<usize>(),
                    "Flushing batch before add due to token budget"
                );
                flushes.push((batch, FlushReason::TokenOverflow));
            }

            if budget > 0 && tokens > budget {
                warn!(
                    tokens,
                    max_batch_tokens = budget,
                    "Request exceeds the token budget on its own, dispatching it alone"
                );
            }

            let (item, ticket) = WorkItem::new(request, tokens, now, cancel);
            state.push(item);

            let metrics = state.metrics();
            match flush_trigger(
                &self.options,
                self.context.flush_predicate.as_ref(),
                &metrics,
            ) {
                Some(reason) => {
                    debug!(
                        %reason,
                        batch_size = metrics.queue_length,
                        tokens = metrics.queued_tokens,
                        "Flushing batch"
                    );
                    flushes.push((state.take_batch(), reason));
                }
                None => {
                    if let Some(flush_at) = next_flush_at(&self.options, &metrics, now) {
                        self.arm_flush_timer(&mut state, flush_at, now);
                    }
                }
            }

            // Tracked before the lock drops, so a concurrent stop waits for it.
            if !flushes.is_empty() {
                self.spawn_dispatch(flushes);
            }

            ticket
        };

        Ok(ticket)
    }

    /// Stop accepting requests, flush the remainder and wait for in-flight batches
    ///
    /// If `cancel` fires before the drain completes, every batch still
    /// executing resolves its requests as cancelled.
    pub(crate) async fn stop(self: &Arc<Self>, cancel: CancellationToken) {
        let batch = {
            let mut state = self.state.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
            state.take_batch()
        };

        let drained = self.drain(batch).instrument(self.span.clone());
        tokio::pin!(drained);

        tokio::select! {
            _ = &mut drained => return,
            _ = cancel.cancelled() => {
                warn!(parent: &self.span, "Drain cancelled, cancelling in-flight batches");
                self.abort.cancel();
            }
        }

        drained.await;
    }

    async fn drain(&self, batch: Vec<WorkItem<T, R>>) {
        if !batch.is_empty() {
            info!(
                batch_size = batch.len(),
                "Stopping queue, flushing remaining items"
            );
            self.dispatch(batch, FlushReason::Stop).await;
        }

        self.tasks.close();
        self.tasks.wait().await;
        debug!("Queue stopped");
    }

    fn resolve_tokens(&self, request: &BatchRequest<T>) -> Result<usize> {
        if let Some(tokens) = request.token_count {
            return Ok(tokens);
        }

        if let Some(counter) = &self.context.token_counter {
            return Ok(counter(request));
        }

        if self.options.has_token_budget() {
            return Err(HyperbatchError::config(
                "A token count is required when max_batch_tokens is configured",
            ));
        }

        Ok(0)
    }

    fn arm_flush_timer(
        self: &Arc<Self>,
        state: &mut QueueState<T, R>,
        flush_at: Instant,
        now: Instant,
    ) {
        if state.stopped {
            return;
        }

        if state
            .timer
            .as_ref()
            .is_some_and(|timer| timer.deadline <= flush_at)
        {
            return;
        }

        state.disarm_timer();
        let id = state.next_timer_id;
        state.next_timer_id += 1;

        let delay = flush_at.saturating_duration_since(now);
        debug!(delay_ms = delay.as_millis() as u64, "Scheduling flush");

        let queue = Arc::clone(self);
        let handle = self.tasks.spawn(
            async move {
                tokio::time::sleep(delay).await;
                queue.on_flush_timer(id).await;
            }
            .instrument(self.span.clone()),
        );

        state.timer = Some(FlushTimer {
            id,
            deadline: flush_at,
            handle,
        });
    }

    async fn on_flush_timer(&self, id: u64) {
        let batch = {
            let mut state = self.state.lock();
            if state.timer.as_ref().map(|timer| timer.id) != Some(id) {
                return;
            }
            // This task is the timer; release it without aborting.
            state.timer = None;
            state.take_batch()
        };

        if batch.is_empty() {
            return;
        }

        debug!(batch_size = batch.len(), "Flush timer fired");
        self.dispatch(batch, FlushReason::Timer).await;
    }

    fn spawn_dispatch(self: &Arc<Self>, flushes: Vec<(Vec<WorkItem<T, R>>, FlushReason)>) {
        let queue = Arc::clone(self);
        self.tasks.spawn(
            async move {
                for (batch, reason) in flushes {
                    queue.dispatch(batch, reason).await;
                }
            }
            .instrument(self.span.clone()),
        );
    }

    /// Run one dequeued batch; single-flight per queue
    async fn dispatch(&self, batch: Vec<WorkItem<T, R>>, reason: FlushReason) {
        if batch.is_empty() {
            return;
        }

        let _in_flight = tokio::select! {
            biased;
            _ = self.abort.cancelled() => {
                self.cancel_items(batch);
                return;
            }
            guard = self.in_flight.lock() => guard,
        };

        let (cancelled, active): (Vec<_>, Vec<_>) =
            batch.into_iter().partition(WorkItem::is_cancelled);
        self.cancel_items(cancelled);

        if active.is_empty() {
            debug!(%reason, "Every request in the batch was cancelled");
            return;
        }

        let batch_id = Uuid::new_v4();
        let tokens: usize = active.iter().map(WorkItem::tokens).sum();
        let (requests, mut slots): (Vec<_>, Vec<_>) =
            active.into_iter().map(WorkItem::into_parts).unzip();
        self.stats.record_batch();

        let span = debug_span!(
            "batch",
            %batch_id,
            batch_size = requests.len(),
            tokens,
            %reason
        );
        debug!(parent: &span, "Processing batch");

        let execution = AssertUnwindSafe(self.execute_with_policies(&requests))
            .catch_unwind()
            .instrument(span.clone())
            .await;

        match execution {
            Ok(Ok(results)) => {
                for (slot, outcome) in slots.iter_mut().zip(results) {
                    self.stats.record_settled(slot.settle(outcome));
                }
            }
            Ok(Err(DrainCancelled)) => {
                warn!(parent: &span, "Batch cancelled during drain");
                self.cancel_slots(&mut slots);
            }
            Err(payload) => {
                let error = anyhow::anyhow!(
                    "batch handler panicked: {}",
                    panic_message(payload.as_ref())
                );
                let failure = (self.context.classifier)(&error);
                warn!(
                    parent: &span,
                    failure_kind = %failure.kind,
                    error = %error,
                    "Batch processing failed"
                );
                for slot in slots.iter_mut() {
                    self.stats
                        .record_settled(slot.settle(Err(failure.problem.clone())));
                }
            }
        }
    }

    fn cancel_items(&self, items: Vec<WorkItem<T, R>>) {
        for mut item in items {
            self.stats.record_settled(item.cancel());
        }
    }

    fn cancel_slots(&self, slots: &mut [CompletionSlot<R>]) {
        for slot in slots {
            self.stats.record_settled(slot.cancel());
        }
    }

    /// Call the handler, retrying and bisecting per the failure classification
    ///
    /// Returns exactly one outcome per request, in request order.
    fn execute_with_policies<'a>(
        &'a self,
        requests: &'a [BatchRequest<T>],
    ) -> BoxFuture<'a, std::result::Result<Vec<Outcome<R>>, DrainCancelled>> {
        async move {
            let retry = &self.context.retry;
            let mut attempts: u32 = 0;

            loop {
                if self.abort.is_cancelled() {
                    return Err(DrainCancelled);
                }

                attempts += 1;
                self.stats.record_invocation();

                let response = tokio::select! {
                    biased;
                    _ = self.abort.cancelled() => return Err(DrainCancelled),
                    response = self.context.handler.handle_batch(&self.key, requests) => response,
                };

                let error = match response {
                    Ok(results) if results.len() == requests.len() => return Ok(results),
                    Ok(results) => {
                        error!(
                            expected = requests.len(),
                            actual = results.len(),
                            "Invalid result count from batch handler"
                        );
                        let problem = problems::invalid_result_count(requests.len(), results.len());
                        return Ok(fail_all(requests.len(), &problem));
                    }
                    Err(error) => error,
                };

                let failure = (self.context.classifier)(&error);

                if failure.bisectable && requests.len() > 1 {
                    self.stats.record_bisection();
                    let (left, right) = requests.split_at(requests.len() / 2);
                    warn!(
                        batch_size = requests.len(),
                        left = left.len(),
                        right = right.len(),
                        failure_kind = %failure.kind,
                        "Bisecting batch due to batch failure"
                    );

                    let mut results = self.execute_with_policies(left).await?;
                    results.extend(self.execute_with_policies(right).await?);
                    return Ok(results);
                }

                if retry.should_retry(&failure, attempts) {
                    let delay = retry.backoff_delay(attempts - 1, &mut rand::thread_rng());
                    self.stats.record_retry();
                    warn!(
                        attempt = attempts + 1,
                        max_attempts = retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        failure_kind = %failure.kind,
                        error = %error,
                        "Retrying batch"
                    );

                    if !delay.is_zero() {
                        tokio::select! {
                            biased;
                            _ = self.abort.cancelled() => return Err(DrainCancelled),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    continue;
                }

                warn!(
                    attempts,
                    failure_kind = %failure.kind,
                    code = %failure.problem.code,
                    "Batch failed"
                );
                return Ok(fail_all(requests.len(), &failure.problem));
            }
        }
        .boxed()
    }
}
