//! An in-process broker for tests.
//!
//! Topics are vectors of partitions, partitions are append-only vectors of
//! records, offsets are positions. Failures can be queued up front to drive
//! the error paths of the publish client deterministically.

use super::endpoint::BrokerEndpoint;
use super::envelope::MessageEnvelope;
use super::partitioner::partition_for_key;
use super::producer::{AckLevel, PublishResult};
use super::transport::{SendFailure, Session, Transport};
use crate::{ConnectError, DisconnectError};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

const DEFAULT_PARTITIONS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub offset: i64,
    pub key: Bytes,
    pub value: Bytes,
    pub timestamp: DateTime<Utc>,
}

#[derive(Default)]
struct Faults {
    connect: VecDeque<ConnectError>,
    send: VecDeque<SendFailure>,
    disconnect: VecDeque<String>,
    send_delay: Option<Duration>,
    shutdown_delay: Option<Duration>,
}

struct BrokerState {
    host: String,
    port: u16,
    auto_create_partitions: Option<usize>,
    trusted_client_cert: Option<String>,
    topics: Mutex<HashMap<String, Vec<Vec<StoredRecord>>>>,
    faults: Mutex<Faults>,
    connect_attempts: AtomicUsize,
    send_attempts: AtomicUsize,
    open_sessions: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cheap to clone; clones share the same logs and counters.
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl InMemoryBroker {
    /// A broker listening on `host:port` that auto-creates unknown topics
    /// with three partitions.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            state: Arc::new(BrokerState {
                host: host.into(),
                port,
                auto_create_partitions: Some(DEFAULT_PARTITIONS),
                trusted_client_cert: None,
                topics: Mutex::new(HashMap::new()),
                faults: Mutex::new(Faults::default()),
                connect_attempts: AtomicUsize::new(0),
                send_attempts: AtomicUsize::new(0),
                open_sessions: AtomicUsize::new(0),
            }),
        }
    }

    fn configure(mut self, f: impl FnOnce(&mut BrokerState)) -> Self {
        match Arc::get_mut(&mut self.state) {
            Some(state) => f(state),
            None => debug!("Broker already shared; configuration change ignored"),
        }
        self
    }

    /// Sends to unknown topics are rejected instead of creating them.
    pub fn without_auto_create(self) -> Self {
        self.configure(|state| state.auto_create_partitions = None)
    }

    /// Only clients presenting exactly this certificate may connect.
    pub fn require_client_cert(self, cert_pem: impl Into<String>) -> Self {
        let cert_pem = cert_pem.into();
        self.configure(|state| state.trusted_client_cert = Some(cert_pem))
    }

    pub fn with_topic(self, name: &str, partitions: usize) -> Self {
        lock(&self.state.topics).insert(name.to_string(), vec![Vec::new(); partitions.max(1)]);
        self
    }

    pub fn fail_next_connect(&self, error: ConnectError) {
        lock(&self.state.faults).connect.push_back(error);
    }

    pub fn fail_next_send(&self, failure: SendFailure) {
        lock(&self.state.faults).send.push_back(failure);
    }

    pub fn fail_next_disconnect(&self, message: impl Into<String>) {
        lock(&self.state.faults).disconnect.push_back(message.into());
    }

    /// Every send waits this long before it is appended.
    pub fn set_send_delay(&self, delay: Option<Duration>) {
        lock(&self.state.faults).send_delay = delay;
    }

    /// Every session shutdown waits this long before it completes.
    pub fn set_shutdown_delay(&self, delay: Option<Duration>) {
        lock(&self.state.faults).shutdown_delay = delay;
    }

    pub fn connect_attempts(&self) -> usize {
        self.state.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn send_attempts(&self) -> usize {
        self.state.send_attempts.load(Ordering::SeqCst)
    }

    pub fn open_sessions(&self) -> usize {
        self.state.open_sessions.load(Ordering::SeqCst)
    }

    pub fn partition_count(&self, topic: &str) -> Option<usize> {
        lock(&self.state.topics).get(topic).map(Vec::len)
    }

    pub fn records(&self, topic: &str, partition: i32) -> Vec<StoredRecord> {
        lock(&self.state.topics)
            .get(topic)
            .and_then(|partitions| partitions.get(partition as usize))
            .cloned()
            .unwrap_or_default()
    }

    /// Records of every partition of `topic`, partition by partition.
    pub fn all_records(&self, topic: &str) -> Vec<StoredRecord> {
        lock(&self.state.topics)
            .get(topic)
            .map(|partitions| partitions.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }
}

impl BrokerState {
    fn append(&self, envelope: &MessageEnvelope) -> Result<(i32, i64), SendFailure> {
        let mut topics = lock(&self.topics);

        if !topics.contains_key(&envelope.topic) {
            match self.auto_create_partitions {
                Some(partitions) => {
                    debug!("Auto-creating topic '{}' with {} partitions", envelope.topic, partitions);
                    topics.insert(envelope.topic.clone(), vec![Vec::new(); partitions]);
                }
                None => {
                    return Err(SendFailure::Rejected(format!(
                        "Unknown topic or partition: {}",
                        envelope.topic
                    )))
                }
            }
        }

        let partitions = topics
            .get_mut(&envelope.topic)
            .ok_or_else(|| SendFailure::Rejected(format!("Unknown topic: {}", envelope.topic)))?;
        // Every envelope carries a key, so an empty key hashes like any other.
        let partition = partition_for_key(&envelope.key, partitions.len() as i32);

        let log = &mut partitions[partition as usize];
        let offset = log.len() as i64;
        log.push(StoredRecord {
            offset,
            key: envelope.key.clone(),
            value: envelope.value.clone(),
            timestamp: envelope.timestamp,
        });

        Ok((partition, offset))
    }
}

#[async_trait]
impl Transport for InMemoryBroker {
    async fn connect(&self, endpoint: &BrokerEndpoint) -> Result<Box<dyn Session>, ConnectError> {
        let state = &self.state;
        state.connect_attempts.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = lock(&state.faults).connect.pop_front() {
            return Err(error);
        }

        if endpoint.host() != state.host || endpoint.port() != state.port {
            return Err(ConnectError::Network(format!(
                "Connection refused: {}",
                endpoint.address()
            )));
        }

        if let Some(trusted) = &state.trusted_client_cert {
            if trusted != endpoint.tls().cert_pem() {
                return Err(ConnectError::Auth(
                    "Client certificate not trusted".to_string(),
                ));
            }
        }

        state.open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(InMemorySession {
            broker: Arc::clone(state),
            closed: AtomicBool::new(false),
        }))
    }
}

struct InMemorySession {
    broker: Arc<BrokerState>,
    closed: AtomicBool,
}

impl InMemorySession {
    fn release(&self) -> bool {
        let was_open = !self.closed.swap(true, Ordering::SeqCst);
        if was_open {
            self.broker.open_sessions.fetch_sub(1, Ordering::SeqCst);
        }
        was_open
    }
}

#[async_trait]
impl Session for InMemorySession {
    async fn send(
        &self,
        envelope: &MessageEnvelope,
        ack_level: AckLevel,
        _timeout: Duration,
    ) -> Result<PublishResult, SendFailure> {
        self.broker.send_attempts.fetch_add(1, Ordering::SeqCst);

        if self.closed.load(Ordering::SeqCst) {
            return Err(SendFailure::Transport("Session closed".to_string()));
        }

        let delay = lock(&self.broker.faults).send_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let fault = lock(&self.broker.faults).send.pop_front();
        if let Some(failure) = fault {
            if matches!(failure, SendFailure::Transport(_)) {
                self.release();
            }
            return Err(failure);
        }

        let (partition, offset) = self.broker.append(envelope)?;
        Ok(PublishResult {
            partition,
            offset: match ack_level {
                AckLevel::None => None,
                AckLevel::Leader | AckLevel::All => Some(offset),
            },
        })
    }

    async fn shutdown(&self, _timeout: Duration) -> Result<(), DisconnectError> {
        if !self.release() {
            return Ok(());
        }

        let delay = lock(&self.broker.faults).shutdown_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match lock(&self.broker.faults).disconnect.pop_front() {
            Some(message) => Err(DisconnectError::new(message)),
            None => Ok(()),
        }
    }
}

impl Drop for InMemorySession {
    fn drop(&mut self) {
        self.release();
    }
}
