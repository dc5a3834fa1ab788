mod common;

use alert_publisher::kafka::{ConnectionManager, RdKafkaTransport};
use alert_publisher::{publish_once, BatteryAlert, KeyStrategy, Producer, ProducerSettings};
use std::sync::Arc;

#[tokio::test]
#[ignore] // Requires a TLS-enabled Kafka broker, see tests/common/mod.rs for TEST_KAFKA_* variables
async fn test_publish_once_live() {
    tracing_subscriber::fmt()
        .with_env_filter("alert_publisher=debug")
        .try_init()
        .ok();

    let config = common::get_test_config();
    let endpoint = config.endpoint().unwrap();
    let settings = config.producer_settings();
    let transport = Arc::new(RdKafkaTransport::new(settings.ack_level, settings.request_timeout));

    let alert = BatteryAlert::now("securityCam-front-1", 14);
    let result = publish_once(transport, &endpoint, &settings, &config.producer.topic, &alert)
        .await
        .unwrap();

    assert!(result.partition >= 0);
    assert!(result.offset.unwrap() >= 0);
}

#[tokio::test]
#[ignore] // Requires a TLS-enabled Kafka broker
async fn test_ordered_offsets_live() {
    let config = common::get_test_config();
    let endpoint = config.endpoint().unwrap();
    let settings = ProducerSettings {
        key_strategy: KeyStrategy::DerivedFromField("deviceId".to_string()),
        ..config.producer_settings()
    };
    let transport = Arc::new(RdKafkaTransport::new(settings.ack_level, settings.request_timeout));
    let producer = Producer::connect(transport, &endpoint, &settings).await.unwrap();

    let mut last = None;
    for percent in [30, 20, 10] {
        let alert = BatteryAlert::now(format!("ordering-test-{}", std::process::id()), percent);
        let result = producer.publish(&config.producer.topic, &alert).await.unwrap();
        let offset = result.offset.unwrap();
        if let Some(previous) = last {
            assert!(offset > previous);
        }
        last = Some(offset);
    }

    producer.disconnect().await;
}

#[tokio::test]
#[ignore] // Requires network access; nothing listens on the port
async fn test_unreachable_broker_live() {
    let mut config = common::get_test_config();
    config.broker.port = 1;
    let endpoint = common::test_endpoint(&config.broker.host, config.broker.port);
    let settings = config.producer_settings();

    let transport = RdKafkaTransport::new(settings.ack_level, settings.request_timeout)
        .with_handshake_timeout(std::time::Duration::from_secs(2));
    let manager = ConnectionManager::new(Arc::new(transport));

    assert!(manager.open(&endpoint).await.is_err());
}
