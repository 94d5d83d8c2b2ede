//! Unit tests for configuration parsing

use vaultq::config::{parse_topic_queues, QueueConfig, ScheduleConfig, WalletConfig};
use vaultq::config::{TopicQueue, DEFAULT_TOPIC_QUEUES};

#[test]
fn default_topic_queues() {
    let queues = parse_topic_queues(DEFAULT_TOPIC_QUEUES).unwrap();
    let names: Vec<&str> = queues.iter().map(|q| q.name.as_str()).collect();
    assert_eq!(names, vec!["default", "trigger", "metric-history", "metric-current"]);

    let config = QueueConfig::default();
    assert_eq!(config.topic_queue("metric-history").map(|q| q.prefetch), Some(2));
    assert!(config.topic_queue("unknown").is_none());
    assert_eq!(config.broker_idle.as_millis(), 1000);
    assert!(!config.broker_publish);
}

#[test]
fn topic_queue_without_prefetch_takes_one() {
    let queues = parse_topic_queues(" alerts , trigger:4 ").unwrap();
    assert_eq!(
        queues,
        vec![
            TopicQueue {
                name: "alerts".to_string(),
                prefetch: 1
            },
            TopicQueue {
                name: "trigger".to_string(),
                prefetch: 4
            },
        ]
    );
}

#[test]
fn invalid_topic_queues_are_rejected() {
    assert!(parse_topic_queues("default:0").is_err());
    assert!(parse_topic_queues("default:many").is_err());
    assert!(parse_topic_queues(" , ").is_err());
}

#[test]
fn consumers_parse_from_json() {
    let consumers: Vec<vaultq::models::Consumer> = serde_json::from_str(
        r#"[{"blockchain":"ethereum","network":"1","address":"0xA","credential":"k"}]"#,
    )
    .unwrap();
    assert_eq!(consumers[0].network.to_string(), "ethereum:1");

    let config = WalletConfig {
        consumers,
        ..WalletConfig::default()
    };
    assert_eq!(config.lock_ttl.as_secs(), 3600);
    assert_eq!(config.lock_namespace, "lock");
}

#[test]
fn unknown_period_has_no_subscribers() {
    assert!(ScheduleConfig::default().subscribers("hour-start").is_empty());
}
