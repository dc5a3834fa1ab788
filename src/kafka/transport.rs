//! The seam between the connection manager and whatever speaks to a broker.

use super::endpoint::BrokerEndpoint;
use super::envelope::MessageEnvelope;
use super::producer::{AckLevel, PublishResult};
use crate::{ConnectError, DisconnectError};
use async_trait::async_trait;
use std::time::Duration;

/// Why a single send did not produce an acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendFailure {
    /// The transport gave up waiting for the acknowledgment.
    Timeout,
    /// The broker answered, and the answer was no.
    Rejected(String),
    /// The session is unusable (socket closed, all brokers down).
    Transport(String),
}

/// Opens sessions to a broker cluster.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Negotiates TLS and completes a broker handshake. Must not retry.
    async fn connect(&self, endpoint: &BrokerEndpoint) -> Result<Box<dyn Session>, ConnectError>;
}

/// One established session. Callers serialize access; implementations need
/// not handle interleaved sends.
#[async_trait]
pub trait Session: Send + Sync {
    /// Sends one record exactly once and waits for the acknowledgment
    /// requested by `ack_level`.
    async fn send(
        &self,
        envelope: &MessageEnvelope,
        ack_level: AckLevel,
        timeout: Duration,
    ) -> Result<PublishResult, SendFailure>;

    /// Flushes and releases the session.
    async fn shutdown(&self, timeout: Duration) -> Result<(), DisconnectError>;
}
