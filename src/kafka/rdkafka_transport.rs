//! Production transport backed by librdkafka.

use super::endpoint::BrokerEndpoint;
use super::envelope::MessageEnvelope;
use super::producer::{AckLevel, PublishResult};
use super::transport::{SendFailure, Session, Transport};
use crate::{ConnectError, DisconnectError};
use async_trait::async_trait;
use rdkafka::client::ClientContext;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, instrument, warn};

type LastError = Arc<Mutex<Option<(RDKafkaErrorCode, String)>>>;

/// Remembers the last client-level error librdkafka reported, since a
/// failed handshake surfaces as a plain metadata timeout.
#[derive(Default)]
struct PublisherContext {
    last_error: LastError,
}

impl PublisherContext {
    fn handle(&self) -> LastError {
        Arc::clone(&self.last_error)
    }
}

fn take_last_error(last_error: &LastError) -> Option<(RDKafkaErrorCode, String)> {
    last_error
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
}

impl ClientContext for PublisherContext {
    fn error(&self, error: KafkaError, reason: &str) {
        warn!("librdkafka error: {}: {}", error, reason);
        if let Some(code) = error.rdkafka_error_code() {
            *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) =
                Some((code, reason.to_string()));
        }
    }
}

type TlsProducer = FutureProducer<PublisherContext>;

/// Connects with `security.protocol=ssl` using the endpoint's PEM material.
///
/// Producer retries and idempotence are disabled so a send is exactly one
/// attempt; the partitioner matches [`partition_for_key`](super::partitioner::partition_for_key).
#[derive(Debug, Clone)]
pub struct RdKafkaTransport {
    ack_level: AckLevel,
    handshake_timeout: Duration,
    message_timeout: Duration,
}

impl RdKafkaTransport {
    /// `ack_level` is the level the initial producer is created with; other
    /// levels get their own producer on first use.
    pub fn new(ack_level: AckLevel, message_timeout: Duration) -> Self {
        Self {
            ack_level,
            handshake_timeout: Duration::from_secs(10),
            message_timeout,
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

fn client_config(endpoint: &BrokerEndpoint, ack_level: AckLevel, message_timeout: Duration) -> ClientConfig {
    let tls = endpoint.tls();
    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", endpoint.address())
        .set("client.id", endpoint.client_id())
        .set("security.protocol", "ssl")
        .set("ssl.ca.pem", tls.ca_pem())
        .set("ssl.certificate.pem", tls.cert_pem())
        .set("ssl.key.pem", tls.key_pem())
        .set("acks", ack_level.as_acks())
        .set("enable.idempotence", "false")
        .set("message.send.max.retries", "0")
        .set("max.in.flight.requests.per.connection", "1")
        .set("partitioner", "murmur2_random")
        .set("linger.ms", "0")
        .set("message.timeout.ms", message_timeout.as_millis().to_string());
    config
}

fn create_producer(
    endpoint: &BrokerEndpoint,
    ack_level: AckLevel,
    message_timeout: Duration,
) -> Result<(TlsProducer, LastError), ConnectError> {
    let context = PublisherContext::default();
    let last_error = context.handle();

    // Every other property is fixed, so a rejected config means bad key material.
    let producer = client_config(endpoint, ack_level, message_timeout)
        .create_with_context(context)
        .map_err(|e| ConnectError::Tls(e.to_string()))?;

    Ok((producer, last_error))
}

fn classify_connect_error(
    error: &KafkaError,
    last: Option<(RDKafkaErrorCode, String)>,
) -> ConnectError {
    let code = error.rdkafka_error_code();

    // Timeouts and transport failures hide the cause; prefer what the
    // error callback saw.
    let opaque = matches!(
        code,
        None | Some(RDKafkaErrorCode::OperationTimedOut)
            | Some(RDKafkaErrorCode::BrokerTransportFailure)
            | Some(RDKafkaErrorCode::AllBrokersDown)
    );
    let (code, reason) = match last {
        Some((last_code, reason)) if opaque => {
            (Some(last_code), format!("{} ({})", error, reason))
        }
        _ => (code, error.to_string()),
    };

    match code {
        Some(RDKafkaErrorCode::SSL) => ConnectError::Tls(reason),
        Some(RDKafkaErrorCode::Authentication)
        | Some(RDKafkaErrorCode::SaslAuthenticationFailed)
        | Some(RDKafkaErrorCode::ClusterAuthorizationFailed)
        | Some(RDKafkaErrorCode::TopicAuthorizationFailed) => ConnectError::Auth(reason),
        // librdkafka reports failed TLS handshakes as transport errors.
        _ if reason.contains("SSL") => ConnectError::Tls(reason),
        _ => ConnectError::Network(reason),
    }
}

fn classify_send_error(error: &KafkaError) -> SendFailure {
    match error {
        KafkaError::Canceled => SendFailure::Transport(error.to_string()),
        _ => match error.rdkafka_error_code() {
            Some(RDKafkaErrorCode::MessageTimedOut) | Some(RDKafkaErrorCode::OperationTimedOut) => {
                SendFailure::Timeout
            }
            Some(RDKafkaErrorCode::BrokerTransportFailure)
            | Some(RDKafkaErrorCode::AllBrokersDown)
            | Some(RDKafkaErrorCode::BrokerDestroy)
            | Some(RDKafkaErrorCode::SSL) => SendFailure::Transport(error.to_string()),
            _ => SendFailure::Rejected(error.to_string()),
        },
    }
}

/// Forces a metadata round-trip so TLS and the broker handshake happen now
/// rather than on the first send.
async fn handshake(
    producer: &TlsProducer,
    last_error: &LastError,
    timeout: Duration,
) -> Result<usize, ConnectError> {
    let client = producer.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        client
            .client()
            .fetch_metadata(None, timeout)
            .map(|metadata| metadata.brokers().len())
    })
    .await
    .map_err(|e| ConnectError::Network(format!("Handshake task failed: {}", e)))?;

    outcome.map_err(|e| classify_connect_error(&e, take_last_error(last_error)))
}

#[async_trait]
impl Transport for RdKafkaTransport {
    #[instrument(skip(self, endpoint), fields(broker = %endpoint.address(), acks = %self.ack_level))]
    async fn connect(&self, endpoint: &BrokerEndpoint) -> Result<Box<dyn Session>, ConnectError> {
        let (producer, last_error) = create_producer(endpoint, self.ack_level, self.message_timeout)?;
        let brokers = handshake(&producer, &last_error, self.handshake_timeout).await?;
        info!("TLS handshake complete, {} broker(s) in cluster metadata", brokers);

        let mut producers = HashMap::new();
        producers.insert(self.ack_level, producer);

        Ok(Box::new(RdKafkaSession {
            endpoint: endpoint.clone(),
            message_timeout: self.message_timeout,
            producers: AsyncMutex::new(Some(producers)),
        }))
    }
}

/// librdkafka fixes `acks` per client, so each ack level in use has its own
/// producer, all on the same credentials.
struct RdKafkaSession {
    endpoint: BrokerEndpoint,
    message_timeout: Duration,
    producers: AsyncMutex<Option<HashMap<AckLevel, TlsProducer>>>,
}

impl RdKafkaSession {
    async fn producer_for(&self, ack_level: AckLevel) -> Result<TlsProducer, SendFailure> {
        let mut guard = self.producers.lock().await;
        let producers = guard
            .as_mut()
            .ok_or_else(|| SendFailure::Transport("Session closed".to_string()))?;

        if let Some(producer) = producers.get(&ack_level) {
            return Ok(producer.clone());
        }

        debug!(acks = %ack_level, "Creating producer for additional ack level");
        let (producer, _) = create_producer(&self.endpoint, ack_level, self.message_timeout)
            .map_err(|e| SendFailure::Transport(e.to_string()))?;
        producers.insert(ack_level, producer.clone());
        Ok(producer)
    }
}

#[async_trait]
impl Session for RdKafkaSession {
    async fn send(
        &self,
        envelope: &MessageEnvelope,
        ack_level: AckLevel,
        timeout: Duration,
    ) -> Result<PublishResult, SendFailure> {
        let producer = self.producer_for(ack_level).await?;

        let record = FutureRecord::to(&envelope.topic)
            .key(&envelope.key[..])
            .payload(&envelope.value[..])
            .timestamp(envelope.timestamp.timestamp_millis());

        match producer.send(record, Timeout::After(timeout)).await {
            Ok((partition, offset)) => Ok(PublishResult {
                partition,
                offset: (offset >= 0).then_some(offset),
            }),
            Err((error, _message)) => Err(classify_send_error(&error)),
        }
    }

    async fn shutdown(&self, timeout: Duration) -> Result<(), DisconnectError> {
        let producers = match self.producers.lock().await.take() {
            Some(producers) => producers,
            None => return Ok(()),
        };

        let flushed = tokio::task::spawn_blocking(move || {
            let mut failures = Vec::new();
            for (level, producer) in producers {
                if let Err(e) = producer.flush(Timeout::After(timeout)) {
                    failures.push(format!("acks={}: {}", level, e));
                }
            }
            failures
        })
        .await
        .map_err(|e| DisconnectError::new(format!("Flush task failed: {}", e)))?;

        if flushed.is_empty() {
            Ok(())
        } else {
            Err(DisconnectError::new(flushed.join("; ")))
        }
    }
}
