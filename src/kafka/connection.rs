use super::endpoint::BrokerEndpoint;
use super::transport::{Session, Transport};
use crate::{ConnectError, DisconnectError};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};

const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifecycle of a [`Connection`].
///
/// A `Connection` value only exists once the handshake succeeded, so
/// `Connecting` is reported by [`ConnectionManager::open`] in its logs and
/// never by [`Connection::state`]. `Disconnecting` is visible while a close
/// is flushing the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}

/// A session to the broker cluster owned by exactly one caller.
///
/// Publishing and closing take the session lock, so a publish in flight and
/// a concurrent close or publish never interleave on the session. The state
/// lives outside that lock and can be read at any time.
pub struct Connection {
    id: u64,
    endpoint: BrokerEndpoint,
    state: StdMutex<ConnectionState>,
    session: Mutex<Option<Box<dyn Session>>>,
}

impl Connection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn endpoint(&self) -> &BrokerEndpoint {
        &self.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub(crate) async fn lock_session(&self) -> MutexGuard<'_, Option<Box<dyn Session>>> {
        self.session.lock().await
    }

    /// Drops the session after a fatal transport error. The caller holds the
    /// session lock.
    pub(crate) fn tear_down(&self, session: &mut Option<Box<dyn Session>>) {
        *session = None;
        self.set_state(ConnectionState::Disconnected);
    }

    /// Closes the session. Closing an already closed connection succeeds.
    ///
    /// The connection ends up `Disconnected` even when the flush fails; the
    /// error is only reported so it can be logged.
    #[instrument(skip(self), fields(connection = self.id))]
    pub async fn close(&self, timeout: Duration) -> Result<(), DisconnectError> {
        let mut guard = self.session.lock().await;

        let session = match guard.take() {
            Some(session) => session,
            None => {
                debug!("Connection already closed");
                self.set_state(ConnectionState::Disconnected);
                return Ok(());
            }
        };

        self.set_state(ConnectionState::Disconnecting);
        info!("Disconnecting from {}", self.endpoint.address());
        let result = session.shutdown(timeout).await;
        self.set_state(ConnectionState::Disconnected);

        match &result {
            Ok(()) => info!("Disconnected from {}", self.endpoint.address()),
            Err(e) => warn!("Disconnect from {} was not clean: {}", self.endpoint.address(), e),
        }
        result
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint.address())
            .finish()
    }
}

/// Opens and closes [`Connection`]s over a [`Transport`].
#[derive(Clone)]
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    next_id: Arc<AtomicU64>,
    close_timeout: Duration,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            next_id: Arc::new(AtomicU64::new(1)),
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }

    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Connects once. Failures are returned as-is; retrying is up to the
    /// caller.
    #[instrument(skip(self, endpoint), fields(broker = %endpoint.address()))]
    pub async fn open(&self, endpoint: &BrokerEndpoint) -> Result<Connection, ConnectError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(connection = id, state = %ConnectionState::Connecting, "Opening connection");

        match self.transport.connect(endpoint).await {
            Ok(session) => {
                info!(connection = id, "Connected to {}", endpoint.address());
                Ok(Connection {
                    id,
                    endpoint: endpoint.clone(),
                    state: StdMutex::new(ConnectionState::Connected),
                    session: Mutex::new(Some(session)),
                })
            }
            Err(e) => {
                warn!(connection = id, "Failed to connect to {}: {}", endpoint.address(), e);
                Err(e)
            }
        }
    }

    pub async fn close(&self, connection: &Connection) -> Result<(), DisconnectError> {
        connection.close(self.close_timeout).await
    }
}
