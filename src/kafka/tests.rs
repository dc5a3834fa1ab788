#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::kafka::endpoint::fixtures;
    use crate::telemetry::BatteryAlert;
    use crate::{Error, PublishError};
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use std::time::Duration;

    const TOPIC: &str = "battery-alerts";

    fn create_test_broker() -> InMemoryBroker {
        InMemoryBroker::new("localhost", 9093).with_topic(TOPIC, 3)
    }

    fn create_test_settings() -> ProducerSettings {
        ProducerSettings {
            ack_level: AckLevel::Leader,
            request_timeout: Duration::from_millis(500),
            key_strategy: KeyStrategy::Random,
        }
    }

    fn create_test_alert(percent: u8) -> BatteryAlert {
        BatteryAlert::new(
            "cam-1",
            percent,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        )
    }

    async fn connect(broker: &InMemoryBroker, settings: &ProducerSettings) -> Producer {
        Producer::connect(
            Arc::new(broker.clone()),
            &fixtures::endpoint("localhost", 9093),
            settings,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_publish_healthy_connection() {
        let broker = create_test_broker();
        let producer = connect(&broker, &create_test_settings()).await;

        let result = producer.publish(TOPIC, &create_test_alert(14)).await.unwrap();

        assert!((0..3).contains(&result.partition));
        assert!(result.offset.unwrap() >= 0);

        let stored = broker.records(TOPIC, result.partition);
        assert_eq!(stored.len(), 1);
        let decoded: BatteryAlert = JsonSerializer::deserialize(&stored[0].value).unwrap();
        assert_eq!(decoded, create_test_alert(14));
    }

    #[tokio::test]
    async fn test_invalid_payload_fails_before_io() {
        let broker = create_test_broker();
        let producer = connect(&broker, &create_test_settings()).await;

        let result = producer.publish(TOPIC, &create_test_alert(140)).await;

        assert!(matches!(result, Err(PublishError::SerializationInvalid(_))));
        assert_eq!(broker.send_attempts(), 0);
        assert!(broker.all_records(TOPIC).is_empty());
    }

    #[tokio::test]
    async fn test_publish_after_close() {
        let broker = create_test_broker();
        let producer = connect(&broker, &create_test_settings()).await;

        producer.disconnect().await;
        let result = producer.publish(TOPIC, &create_test_alert(14)).await;

        assert_eq!(result, Err(PublishError::NotConnected));
        assert_eq!(broker.send_attempts(), 0);
        assert!(producer.connection().close(Duration::from_secs(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_network_failure_is_single_attempt() {
        let broker = create_test_broker();
        let producer = connect(&broker, &create_test_settings()).await;

        broker.fail_next_send(SendFailure::Transport("connection reset by peer".to_string()));
        let result = producer.publish(TOPIC, &create_test_alert(14)).await;

        assert_eq!(result, Err(PublishError::NotConnected));
        assert_eq!(broker.send_attempts(), 1);
        assert!(broker.all_records(TOPIC).is_empty());
        assert_eq!(producer.connection().state(), ConnectionState::Disconnected);
        assert_eq!(broker.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_same_key_offsets_increase() {
        let broker = create_test_broker();
        let settings = ProducerSettings {
            key_strategy: KeyStrategy::DerivedFromField("deviceId".to_string()),
            ..create_test_settings()
        };
        let producer = connect(&broker, &settings).await;

        let mut results = Vec::new();
        for percent in (0..20).rev() {
            results.push(producer.publish(TOPIC, &create_test_alert(percent)).await.unwrap());
        }

        let partition = results[0].partition;
        assert!(results.iter().all(|r| r.partition == partition));
        for pair in results.windows(2) {
            assert!(pair[0].offset.unwrap() < pair[1].offset.unwrap());
        }

        // Stored order matches call order.
        let percents: Vec<u8> = broker
            .records(TOPIC, partition)
            .iter()
            .map(|r| JsonSerializer::deserialize::<BatteryAlert>(&r.value).unwrap().battery_percent)
            .collect();
        assert_eq!(percents, (0..20).rev().collect::<Vec<u8>>());
    }

    #[tokio::test]
    async fn test_timeout_leaves_connection_usable() {
        let broker = create_test_broker();
        let settings = ProducerSettings {
            request_timeout: Duration::from_millis(50),
            ..create_test_settings()
        };
        let producer = connect(&broker, &settings).await;

        broker.set_send_delay(Some(Duration::from_millis(500)));
        let result = producer.publish(TOPIC, &create_test_alert(14)).await;
        assert_eq!(
            result,
            Err(PublishError::Timeout {
                after: Duration::from_millis(50)
            })
        );
        assert!(result.unwrap_err().is_retryable());
        assert!(producer.connection().is_connected());

        broker.set_send_delay(None);
        assert!(producer.publish(TOPIC, &create_test_alert(14)).await.is_ok());
    }

    #[tokio::test]
    async fn test_broker_rejection() {
        let broker = InMemoryBroker::new("localhost", 9093).without_auto_create();
        let producer = connect(&broker, &create_test_settings()).await;

        let result = producer.publish("unknown-topic", &create_test_alert(14)).await;

        match result {
            Err(PublishError::BrokerRejected { reason }) => assert!(reason.contains("unknown-topic")),
            other => panic!("expected broker rejection, got {:?}", other),
        }
        assert!(producer.connection().is_connected());
    }

    #[tokio::test]
    async fn test_transport_timeout_maps_to_timeout() {
        let broker = create_test_broker();
        let producer = connect(&broker, &create_test_settings()).await;

        broker.fail_next_send(SendFailure::Timeout);
        let result = producer.publish(TOPIC, &create_test_alert(14)).await;
        assert!(matches!(result, Err(PublishError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_fire_and_forget() {
        let broker = create_test_broker();
        let settings = ProducerSettings {
            ack_level: AckLevel::None,
            ..create_test_settings()
        };
        let producer = connect(&broker, &settings).await;

        let result = producer.publish(TOPIC, &create_test_alert(14)).await.unwrap();
        assert_eq!(result.offset, None);
        assert_eq!(broker.all_records(TOPIC).len(), 1);
    }

    #[tokio::test]
    async fn test_coordinator_rejects_empty_envelope() {
        let broker = create_test_broker();
        let manager = ConnectionManager::new(Arc::new(broker.clone()));
        let connection = manager.open(&fixtures::endpoint("localhost", 9093)).await.unwrap();

        let envelope = MessageEnvelope {
            topic: TOPIC.to_string(),
            key: bytes::Bytes::from_static(b"k"),
            value: bytes::Bytes::new(),
            timestamp: Utc::now(),
        };
        let result = PublishCoordinator::new(Duration::from_secs(1))
            .publish(&connection, &envelope, AckLevel::Leader)
            .await;

        assert!(matches!(result, Err(PublishError::SerializationInvalid(_))));
        assert_eq!(broker.send_attempts(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_publishes_serialize() {
        let broker = create_test_broker();
        let settings = ProducerSettings {
            key_strategy: KeyStrategy::DerivedFromField("deviceId".to_string()),
            ..create_test_settings()
        };
        let producer = Arc::new(connect(&broker, &settings).await);

        let handles: Vec<_> = (0..25u8)
            .map(|percent| {
                let producer = Arc::clone(&producer);
                tokio::spawn(async move { producer.publish(TOPIC, &create_test_alert(percent)).await })
            })
            .collect();

        let mut offsets = Vec::new();
        for handle in handles {
            offsets.push(handle.await.unwrap().unwrap().offset.unwrap());
        }
        offsets.sort_unstable();

        assert_eq!(offsets, (0..25).collect::<Vec<i64>>());
        assert_eq!(broker.send_attempts(), 25);
    }

    #[tokio::test]
    async fn test_publish_once_disconnects() {
        let broker = create_test_broker();
        let result = publish_once(
            Arc::new(broker.clone()),
            &fixtures::endpoint("localhost", 9093),
            &create_test_settings(),
            TOPIC,
            &create_test_alert(14),
        )
        .await
        .unwrap();

        assert_eq!(result.offset, Some(0));
        assert_eq!(broker.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_publish_once_disconnect_failure_not_propagated() {
        let broker = create_test_broker();
        broker.fail_next_disconnect("flush timed out");

        let result = publish_once(
            Arc::new(broker.clone()),
            &fixtures::endpoint("localhost", 9093),
            &create_test_settings(),
            TOPIC,
            &create_test_alert(14),
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(broker.all_records(TOPIC).len(), 1);
    }

    #[tokio::test]
    async fn test_publish_once_reports_failure_and_still_disconnects() {
        let broker = create_test_broker();
        broker.fail_next_send(SendFailure::Rejected("leader not available".to_string()));

        let result = publish_once(
            Arc::new(broker.clone()),
            &fixtures::endpoint("localhost", 9093),
            &create_test_settings(),
            TOPIC,
            &create_test_alert(14),
        )
        .await;

        assert!(matches!(
            result,
            Err(Error::Publish(PublishError::BrokerRejected { .. }))
        ));
        assert_eq!(broker.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_publish_once_connect_failure() {
        let broker = create_test_broker();
        let result = publish_once(
            Arc::new(broker.clone()),
            &fixtures::endpoint("localhost", 19093),
            &create_test_settings(),
            TOPIC,
            &create_test_alert(14),
        )
        .await;

        assert!(matches!(result, Err(Error::Connect(crate::ConnectError::Network(_)))));
        assert_eq!(broker.send_attempts(), 0);
    }

    #[test]
    fn test_ack_level_names() {
        let parsed: AckLevel = serde_json::from_str("\"all\"").unwrap();
        assert_eq!(parsed, AckLevel::All);
        assert_eq!(parsed.to_string(), "all");

        // Only the names are accepted, the same as in config files.
        assert!(serde_json::from_str::<AckLevel>("\"0\"").is_err());
        assert!(serde_json::from_str::<AckLevel>("\"quorum\"").is_err());
        assert_eq!(AckLevel::default(), AckLevel::Leader);
        assert_eq!(AckLevel::All.as_acks(), "all");
    }

    #[derive(Debug, serde::Serialize, serde::Deserialize)]
    struct SiteReading {
        site: String,
        n: u32,
    }

    impl Payload for SiteReading {}

    #[tokio::test]
    async fn test_empty_derived_key_keeps_partition_affinity() {
        let broker = create_test_broker();
        let settings = ProducerSettings {
            key_strategy: KeyStrategy::DerivedFromField("site".to_string()),
            ..create_test_settings()
        };
        let producer = connect(&broker, &settings).await;

        let mut results = Vec::new();
        for n in 0..3 {
            let reading = SiteReading {
                site: String::new(),
                n,
            };
            results.push(producer.publish(TOPIC, &reading).await.unwrap());
        }

        let partition = results[0].partition;
        assert!(results.iter().all(|r| r.partition == partition));
        let offsets: Vec<i64> = results.iter().map(|r| r.offset.unwrap()).collect();
        assert_eq!(offsets, vec![0, 1, 2]);
        assert_eq!(broker.records(TOPIC, partition).len(), 3);
    }
}
