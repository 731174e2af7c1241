//! Configuration integration tests
//!
//! Loading YAML from disk and applying it to a scheduler.

#[cfg(test)]
mod tests {
    use crate::common::fixtures::{RecordingHandler, TestScheduler, key};
    use futures::future::join_all;
    use hyperbatch::{HyperbatchConfig, HyperbatchError, QueueFullMode};
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    const CONFIG: &str = r#"
queue:
  max_batch_size: 2
  max_wait_ms: 25

retry:
  max_attempts: 2
  base_delay_ms: 5
  max_delay_ms: 50
  jitter_factor: 0.0

logging:
  level: debug

overrides:
  bulk:
    max_batch_size: 4
    max_queue_size: 8
    queue_full_mode: reject
"#;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_load_config_from_file() {
        let file = write_config(CONFIG);
        let config = HyperbatchConfig::from_file(file.path()).await.unwrap();

        assert_eq!(config.queue.max_batch_size, 2);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.logging.level, "debug");

        let bulk = config.queue_options_for("bulk");
        assert_eq!(bulk.max_batch_size, 4);
        assert_eq!(bulk.queue_full_mode, QueueFullMode::Reject);

        let default = config.queue_options_for("anything");
        assert_eq!(default.max_wait_time, Duration::from_millis(25));
    }

    #[tokio::test]
    async fn test_invalid_override_is_rejected() {
        let file = write_config("overrides:\n  bulk:\n    queue_full_mode: reject\n");
        let result = HyperbatchConfig::from_file(file.path()).await;

        match result {
            Err(HyperbatchError::Validation(message)) => assert!(message.contains("bulk")),
            other => panic!("Expected validation error, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_from_config() {
        let config = HyperbatchConfig::from_yaml_str(CONFIG).unwrap();
        let handler = RecordingHandler::new();
        let scheduler = TestScheduler::builder(handler.clone())
            .from_config(&config)
            .build()
            .unwrap();

        let pair = join_all([
            scheduler.submit(key("chat"), 1).unwrap(),
            scheduler.submit(key("chat"), 2).unwrap(),
        ])
        .await;
        assert_eq!(pair, vec![Ok(10), Ok(20)]);

        let bulk: Vec<_> = (3..=6)
            .map(|payload| scheduler.submit(key("bulk"), payload).unwrap())
            .collect();
        assert_eq!(
            join_all(bulk).await,
            vec![Ok(30), Ok(40), Ok(50), Ok(60)]
        );

        assert_eq!(
            scheduler.queue_options(&key("bulk")),
            Some(config.queue_options_for("bulk"))
        );
        assert_eq!(
            handler.log.payloads(),
            vec![vec![1, 2], vec![3, 4, 5, 6]]
        );
    }

    #[test]
    fn test_config_yaml_round_trip() {
        let config = HyperbatchConfig::from_yaml_str(CONFIG).unwrap();
        let yaml = config.to_yaml().unwrap();

        assert_eq!(HyperbatchConfig::from_yaml_str(&yaml).unwrap(), config);
    }
}
