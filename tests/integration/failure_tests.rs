//! Failure handling integration tests
//!
//! Retry with backoff, bisection, result-count violations, handler panics and
//! queue capacity rejection.

#[cfg(test)]
mod tests {
    use crate::assert_duration_within;
    use crate::common::assertions::OutcomeAssertions;
    use crate::common::fixtures::{
        FlakyHandler, PanickingHandler, PoisonHandler, RecordingHandler, ShortResultHandler,
        TestScheduler, UnclassifiedErrorHandler, key, retry_attempts, scheduler, size_only,
    };
    use futures::future::join_all;
    use hyperbatch::{BatchFailure, QueueFullMode, RequestError, codes, problems};
    use std::time::Duration;
    use tokio::time::Instant;

    fn with_retry<H>(handler: H, max_attempts: u32, batch_size: usize) -> TestScheduler
    where
        H: hyperbatch::BatchHandler<String, i32, i32>,
    {
        TestScheduler::builder(handler)
            .default_options(size_only(batch_size))
            .retry(retry_attempts(max_attempts))
            .build()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_bisection_isolates_poison_requests() {
        let handler = PoisonHandler::default();
        let scheduler = scheduler(handler.clone(), size_only(4));

        let tickets: Vec<_> = [1, -2, 3, -4]
            .into_iter()
            .map(|payload| scheduler.submit(key("k"), payload).unwrap())
            .collect();
        let results = join_all(tickets).await;

        assert_eq!(results[0], Ok(10));
        results[1].assert_problem(codes::VALIDATION_FAILED);
        assert_eq!(results[2], Ok(30));
        results[3].assert_problem(codes::VALIDATION_FAILED);

        // Whole batch, both halves, then each single request.
        assert_eq!(
            handler.log.payloads(),
            vec![
                vec![1, -2, 3, -4],
                vec![1, -2],
                vec![1],
                vec![-2],
                vec![3, -4],
                vec![3],
                vec![-4],
            ]
        );

        let stats = scheduler.stats(&key("k")).unwrap();
        assert_eq!(stats.bisections, 3);
        assert_eq!(stats.handler_invocations, 7);
        assert_eq!(stats.items_succeeded, 2);
        assert_eq!(stats.items_failed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bisection_of_clean_half_runs_once() {
        let handler = PoisonHandler::default();
        let scheduler = scheduler(handler.clone(), size_only(4));

        let tickets: Vec<_> = [1, 2, 3, -4]
            .into_iter()
            .map(|payload| scheduler.submit(key("k"), payload).unwrap())
            .collect();
        let results = join_all(tickets).await;

        assert_eq!(&results[..3], &[Ok(10), Ok(20), Ok(30)]);
        results[3].assert_problem(codes::VALIDATION_FAILED);
        assert_eq!(
            handler.log.payloads(),
            vec![vec![1, 2, 3, -4], vec![1, 2], vec![3, -4], vec![3], vec![-4]]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried() {
        let handler = FlakyHandler::transient(1);
        let scheduler = with_retry(handler.clone(), 3, 2);

        let results = join_all([
            scheduler.submit(key("k"), 1).unwrap(),
            scheduler.submit(key("k"), 2).unwrap(),
        ])
        .await;

        assert_eq!(results, vec![Ok(10), Ok(20)]);
        assert_eq!(handler.log.payloads(), vec![vec![1, 2], vec![1, 2]]);

        let stats = scheduler.stats(&key("k")).unwrap();
        assert_eq!(stats.retries, 1);
        assert_eq!(stats.handler_invocations, 2);
        assert_eq!(stats.batches_dispatched, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_backoff_doubles() {
        let handler = FlakyHandler::transient(2);
        let scheduler = with_retry(handler.clone(), 3, 1);
        let start = Instant::now();

        assert_eq!(scheduler.submit(key("k"), 1).unwrap().await, Ok(10));

        // 10 ms before the second attempt, 20 ms before the third.
        assert_duration_within!(start.elapsed(), 30, 31);
        assert_eq!(handler.log.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded_by_max_attempts() {
        let handler = FlakyHandler::transient(usize::MAX);
        let scheduler = with_retry(handler.clone(), 3, 1);

        let result = scheduler.submit(key("k"), 1).unwrap().await;

        result.assert_problem(codes::BATCH_FAILED);
        assert_eq!(
            result.unwrap_err().problem().map(|p| p.description.clone()),
            Some("upstream unavailable".to_string())
        );
        assert_eq!(handler.log.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_failure_is_not_retried() {
        let failure = BatchFailure::client(problems::validation_failed("bad request"), false);
        let handler = FlakyHandler::always(failure);
        let scheduler = with_retry(handler.clone(), 5, 2);

        let results = join_all([
            scheduler.submit(key("k"), 1).unwrap(),
            scheduler.submit(key("k"), 2).unwrap(),
        ])
        .await;

        for result in &results {
            result.assert_problem(codes::VALIDATION_FAILED);
        }
        assert_eq!(handler.log.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_and_non_retryable_failures_fail_fast() {
        let unknown = FlakyHandler::always(BatchFailure::unknown(problems::batch_failed("?")));
        let scheduler = with_retry(unknown.clone(), 5, 1);
        scheduler
            .submit(key("k"), 1)
            .unwrap()
            .await
            .assert_problem(codes::BATCH_FAILED);
        assert_eq!(unknown.log.calls(), 1);

        let transient = FlakyHandler::always(
            BatchFailure::transient(problems::batch_failed("quota")).with_retryable(false),
        );
        let scheduler = with_retry(transient.clone(), 5, 1);
        scheduler
            .submit(key("k"), 1)
            .unwrap()
            .await
            .assert_problem(codes::BATCH_FAILED);
        assert_eq!(transient.log.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_never_bisected() {
        let handler = FlakyHandler::always(BatchFailure::transient(problems::batch_failed("busy")));
        let scheduler = with_retry(handler.clone(), 2, 4);

        let tickets: Vec<_> = (1..=4)
            .map(|payload| scheduler.submit(key("k"), payload).unwrap())
            .collect();
        join_all(tickets).await;

        assert_eq!(
            handler.log.payloads(),
            vec![vec![1, 2, 3, 4], vec![1, 2, 3, 4]]
        );
        assert_eq!(scheduler.stats(&key("k")).unwrap().bisections, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unclassified_error_is_treated_as_transport() {
        let handler = UnclassifiedErrorHandler::default();
        let scheduler = with_retry(handler.clone(), 2, 1);

        let result = scheduler.submit(key("k"), 1).unwrap().await;

        result.assert_problem(codes::BATCH_FAILED);
        let description = result
            .unwrap_err()
            .problem()
            .map(|p| p.description.clone())
            .unwrap_or_default();
        assert!(description.contains("connection reset"));
        assert_eq!(handler.log.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_classifier_overrides_default() {
        let handler = UnclassifiedErrorHandler::default();
        let scheduler = TestScheduler::builder(handler.clone())
            .default_options(size_only(1))
            .retry(retry_attempts(5))
            .classifier(|error| {
                BatchFailure::unknown(problems::batch_failed(format!("classified: {}", error)))
            })
            .build()
            .unwrap();

        let result = scheduler.submit(key("k"), 1).unwrap().await;

        assert_eq!(
            result.unwrap_err().problem().map(|p| p.description.clone()),
            Some("classified: connection reset by peer".to_string())
        );
        assert_eq!(handler.log.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_count_mismatch_fails_batch_without_retry() {
        let handler = ShortResultHandler::default();
        let scheduler = with_retry(handler.clone(), 3, 3);

        let tickets: Vec<_> = (1..=3)
            .map(|payload| scheduler.submit(key("k"), payload).unwrap())
            .collect();
        let results = join_all(tickets).await;

        for result in &results {
            result.assert_problem(codes::INVALID_RESULT_COUNT);
        }
        let details = results[0]
            .clone()
            .unwrap_err()
            .problem()
            .and_then(|p| p.details.clone())
            .unwrap_or_default();
        assert_eq!(details.get("expected").map(String::as_str), Some("3"));
        assert_eq!(details.get("actual").map(String::as_str), Some("2"));
        assert_eq!(handler.log.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_panic_fails_batch_and_engine_survives() {
        let handler = PanickingHandler::default();
        let scheduler = scheduler(handler.clone(), size_only(2));

        let results = join_all([
            scheduler.submit(key("k"), 1).unwrap(),
            scheduler.submit(key("k"), 2).unwrap(),
        ])
        .await;
        for result in &results {
            result.assert_problem(codes::BATCH_FAILED);
        }
        let description = results[0]
            .clone()
            .unwrap_err()
            .problem()
            .map(|p| p.description.clone())
            .unwrap_or_default();
        assert!(description.contains("handler exploded"));

        let again = join_all([
            scheduler.submit(key("k"), 3).unwrap(),
            scheduler.submit(key("k"), 4).unwrap(),
        ])
        .await;
        assert!(again.iter().all(Result::is_err));
        assert_eq!(handler.log.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reject_mode_fails_new_request_only() {
        let handler = RecordingHandler::new();
        let scheduler = scheduler(
            handler.clone(),
            size_only(100)
                .with_max_queue_size(2)
                .with_queue_full_mode(QueueFullMode::Reject),
        );

        let first = scheduler.submit(key("k"), 1).unwrap();
        let second = scheduler.submit(key("k"), 2).unwrap();
        let rejected = scheduler.submit(key("k"), 3).unwrap().await;

        rejected.assert_problem(codes::QUEUE_FULL);
        assert_eq!(scheduler.metrics(&key("k")).unwrap().queue_length, 2);
        assert_eq!(scheduler.stats(&key("k")).unwrap().items_rejected, 1);

        scheduler.shutdown().await;
        assert_eq!(join_all([first, second]).await, vec![Ok(10), Ok(20)]);
        assert_eq!(handler.log.payloads(), vec![vec![1, 2]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_distinct_from_cancellation() {
        let handler = FlakyHandler::always(BatchFailure::unknown(problems::batch_failed("down")));
        let scheduler = scheduler(handler, size_only(1));

        let error = scheduler.submit(key("k"), 1).unwrap().await.unwrap_err();

        assert!(!error.is_cancelled());
        assert!(matches!(error, RequestError::Failed(_)));
    }
}
