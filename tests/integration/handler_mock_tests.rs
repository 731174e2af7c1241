//! Handler contract tests using mockall
//!
//! Expectations verify exactly what the scheduler passes to the handler.

#[cfg(test)]
mod tests {
    use crate::common::fixtures::{TestScheduler, key, retry_attempts, size_only};
    use async_trait::async_trait;
    use futures::future::join_all;
    use hyperbatch::{
        BatchFailure, BatchHandler, BatchRequest, Outcome, SchedulerBuilder, problems,
    };
    use mockall::Sequence;
    use mockall::mock;
    use std::sync::Arc;

    mock! {
        pub Handler {}

        #[async_trait]
        impl BatchHandler<String, i32, i32> for Handler {
            async fn handle_batch(
                &self,
                key: &String,
                requests: &[BatchRequest<i32>],
            ) -> anyhow::Result<Vec<Outcome<i32>>>;
        }
    }

    fn payloads(requests: &[BatchRequest<i32>]) -> Vec<i32> {
        requests.iter().map(|r| r.payload).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_receives_key_and_ordered_requests() {
        let mut handler = MockHandler::new();
        handler
            .expect_handle_batch()
            .withf(|key, requests| {
                key.as_str() == "embeddings" && payloads(requests) == vec![5, 6, 7]
            })
            .times(1)
            .returning(|_, requests| Ok(requests.iter().map(|r| Ok(r.payload + 1)).collect()));

        let scheduler = TestScheduler::builder(handler)
            .default_options(size_only(3))
            .build()
            .unwrap();

        let tickets: Vec<_> = [5, 6, 7]
            .into_iter()
            .map(|payload| scheduler.submit(key("embeddings"), payload).unwrap())
            .collect();

        assert_eq!(join_all(tickets).await, vec![Ok(6), Ok(7), Ok(8)]);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_request_failures_are_delivered_individually() {
        let mut handler = MockHandler::new();
        handler.expect_handle_batch().times(1).returning(|_, requests| {
            Ok(requests
                .iter()
                .map(|r| {
                    if r.payload % 2 == 0 {
                        Ok(r.payload)
                    } else {
                        Err(problems::validation_failed("odd payload"))
                    }
                })
                .collect())
        });

        let scheduler = TestScheduler::builder(handler)
            .default_options(size_only(2))
            .build()
            .unwrap();

        let results = join_all([
            scheduler.submit(key("k"), 1).unwrap(),
            scheduler.submit(key("k"), 2).unwrap(),
        ])
        .await;

        assert!(results[0].is_err());
        assert_eq!(results[1], Ok(2));
        let stats = scheduler.stats(&key("k")).unwrap();
        assert_eq!(stats.items_succeeded, 1);
        assert_eq!(stats.items_failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_resends_the_same_batch() {
        let mut handler = MockHandler::new();
        let mut sequence = Sequence::new();
        handler
            .expect_handle_batch()
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, _| {
                Err(BatchFailure::transient(problems::batch_failed("rate limited")).into())
            });
        handler
            .expect_handle_batch()
            .withf(|_, requests| payloads(requests) == vec![1, 2])
            .times(1)
            .in_sequence(&mut sequence)
            .returning(|_, requests| Ok(requests.iter().map(|r| Ok(r.payload * 3)).collect()));

        let scheduler = TestScheduler::builder(handler)
            .default_options(size_only(2))
            .retry(retry_attempts(2))
            .build()
            .unwrap();

        let results = join_all([
            scheduler.submit(key("k"), 1).unwrap(),
            scheduler.submit(key("k"), 2).unwrap(),
        ])
        .await;

        assert_eq!(results, vec![Ok(3), Ok(6)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_is_not_called_for_fully_cancelled_batch() {
        let mut handler = MockHandler::new();
        handler.expect_handle_batch().never();

        let scheduler = TestScheduler::builder(handler)
            .default_options(size_only(100))
            .build()
            .unwrap();

        let cancel = tokio_util::sync::CancellationToken::new();
        let ticket = scheduler
            .enqueue(key("k"), BatchRequest::new(1), cancel.clone())
            .unwrap();
        cancel.cancel();
        assert!(ticket.await.is_err());

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_handler_is_accepted() {
        let mut handler = MockHandler::new();
        handler
            .expect_handle_batch()
            .times(1)
            .returning(|_, requests| Ok(requests.iter().map(|r| Ok(r.payload)).collect()));

        let shared: Arc<dyn BatchHandler<String, i32, i32>> = Arc::new(handler);
        let scheduler = SchedulerBuilder::from_shared(shared)
            .default_options(size_only(1))
            .build()
            .unwrap();

        assert_eq!(scheduler.submit(key("k"), 9).unwrap().await, Ok(9));
    }
}
