pub mod connection;
pub mod endpoint;
pub mod envelope;
pub mod key_strategy;
pub mod memory;
pub mod partitioner;
pub mod producer;
pub mod rdkafka_transport;
pub mod serializer;
pub mod transport;

#[cfg(test)]
mod tests;

pub use connection::{Connection, ConnectionManager, ConnectionState};
pub use endpoint::{BrokerEndpoint, TlsBundle};
pub use envelope::{EnvelopeBuilder, MessageEnvelope};
pub use key_strategy::KeyStrategy;
pub use memory::{InMemoryBroker, StoredRecord};
pub use producer::{publish_once, AckLevel, Producer, ProducerSettings, PublishCoordinator, PublishResult};
pub use rdkafka_transport::RdKafkaTransport;
pub use serializer::{JsonSerializer, Payload};
pub use transport::{SendFailure, Session, Transport};
