use super::connection::{Connection, ConnectionManager, ConnectionState};
use super::endpoint::BrokerEndpoint;
use super::envelope::{EnvelopeBuilder, MessageEnvelope};
use super::key_strategy::KeyStrategy;
use super::serializer::Payload;
use super::transport::{SendFailure, Transport};
use crate::{ConnectError, PublishError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Durability requested before a send counts as successful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AckLevel {
    /// Fire and forget. No offset is reported.
    None,
    /// The partition leader has written the record.
    #[default]
    Leader,
    /// All in-sync replicas have the record.
    All,
}

impl AckLevel {
    /// Value of the Kafka `acks` producer property.
    pub fn as_acks(&self) -> &'static str {
        match self {
            AckLevel::None => "0",
            AckLevel::Leader => "1",
            AckLevel::All => "all",
        }
    }
}

impl fmt::Display for AckLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AckLevel::None => "none",
            AckLevel::Leader => "leader",
            AckLevel::All => "all",
        };
        f.write_str(name)
    }
}

/// Where the broker put a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PublishResult {
    pub partition: i32,
    /// Absent when nothing was acknowledged (`AckLevel::None`).
    pub offset: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct ProducerSettings {
    pub ack_level: AckLevel,
    pub request_timeout: Duration,
    pub key_strategy: KeyStrategy,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            ack_level: AckLevel::default(),
            request_timeout: Duration::from_secs(30),
            key_strategy: KeyStrategy::default(),
        }
    }
}

/// Sends envelopes over a connection, one attempt per call.
#[derive(Debug, Clone)]
pub struct PublishCoordinator {
    request_timeout: Duration,
}

impl PublishCoordinator {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }

    /// Sends `envelope` once and waits for the acknowledgment `ack_level`
    /// asks for.
    ///
    /// On `Timeout` the connection stays usable. A fatal transport failure
    /// closes the connection and is reported as `NotConnected`.
    #[instrument(skip(self, connection, envelope), fields(connection = connection.id(), topic = %envelope.topic))]
    pub async fn publish(
        &self,
        connection: &Connection,
        envelope: &MessageEnvelope,
        ack_level: AckLevel,
    ) -> std::result::Result<PublishResult, PublishError> {
        envelope.check()?;

        let mut guard = connection.lock_session().await;
        let session = match (connection.state(), guard.as_ref()) {
            (ConnectionState::Connected, Some(session)) => session,
            (state, _) => {
                debug!(%state, "Publish on a connection that is not open");
                return Err(PublishError::NotConnected);
            }
        };

        let outcome = tokio::time::timeout(
            self.request_timeout,
            session.send(envelope, ack_level, self.request_timeout),
        )
        .await;

        match outcome {
            Ok(Ok(result)) => {
                debug!(partition = result.partition, offset = ?result.offset, "Record acknowledged");
                Ok(result)
            }
            Ok(Err(SendFailure::Timeout)) | Err(_) => {
                warn!("No acknowledgment within {:?}", self.request_timeout);
                Err(PublishError::Timeout {
                    after: self.request_timeout,
                })
            }
            Ok(Err(SendFailure::Rejected(reason))) => {
                warn!("Broker rejected record: {}", reason);
                Err(PublishError::BrokerRejected { reason })
            }
            Ok(Err(SendFailure::Transport(reason))) => {
                warn!("Connection lost during publish: {}", reason);
                connection.tear_down(&mut guard);
                Err(PublishError::NotConnected)
            }
        }
    }
}

/// One connection plus the builder and coordinator that publish over it.
pub struct Producer {
    manager: ConnectionManager,
    connection: Connection,
    builder: EnvelopeBuilder,
    coordinator: PublishCoordinator,
    ack_level: AckLevel,
}

impl Producer {
    pub async fn connect(
        transport: Arc<dyn Transport>,
        endpoint: &BrokerEndpoint,
        settings: &ProducerSettings,
    ) -> std::result::Result<Self, ConnectError> {
        let manager = ConnectionManager::new(transport);
        let connection = manager.open(endpoint).await?;

        Ok(Self {
            manager,
            connection,
            builder: EnvelopeBuilder::new(settings.key_strategy.clone()),
            coordinator: PublishCoordinator::new(settings.request_timeout),
            ack_level: settings.ack_level,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Builds an envelope for `payload` and publishes it to `topic`.
    ///
    /// Invalid payloads fail before anything is sent.
    pub async fn publish<P: Payload>(
        &self,
        topic: &str,
        payload: &P,
    ) -> std::result::Result<PublishResult, PublishError> {
        let envelope = self.builder.build(topic, payload)?;
        self.coordinator
            .publish(&self.connection, &envelope, self.ack_level)
            .await
    }

    /// Closes the connection. A failed close is logged, never returned.
    pub async fn disconnect(&self) {
        if let Err(e) = self.manager.close(&self.connection).await {
            warn!("Ignoring disconnect failure: {}", e);
        }
    }
}

/// Connect, send one record, disconnect.
///
/// The disconnect runs whether or not the send succeeded, and its failure
/// never replaces the publish outcome.
pub async fn publish_once<P: Payload>(
    transport: Arc<dyn Transport>,
    endpoint: &BrokerEndpoint,
    settings: &ProducerSettings,
    topic: &str,
    payload: &P,
) -> Result<PublishResult> {
    info!("Connecting to {}", endpoint.address());
    let producer = Producer::connect(transport, endpoint, settings).await?;
    info!("Connection to {} successful", endpoint.address());

    let outcome = producer.publish(topic, payload).await;
    producer.disconnect().await;

    match outcome {
        Ok(result) => {
            info!(
                topic,
                partition = result.partition,
                offset = ?result.offset,
                "Message sent successfully"
            );
            Ok(result)
        }
        Err(e) => Err(e.into()),
    }
}
