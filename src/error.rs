//! Error types and result handling for alert-publisher.
//!
//! The publish path has its own small taxonomy ([`ConnectError`],
//! [`PublishError`], [`DisconnectError`]) so callers can match on failure
//! kinds. The crate-level [`Error`] aggregates those together with
//! configuration and credential failures, and [`Result`] is the matching
//! alias used throughout the crate.
//!
//! # Example
//!
//! ```rust
//! use alert_publisher::{Error, PublishError, Result};
//!
//! fn send() -> Result<()> {
//!     Err(PublishError::NotConnected.into())
//! }
//!
//! match send() {
//!     Ok(()) => println!("Published"),
//!     Err(Error::Publish(e)) if e.is_retryable() => eprintln!("Retry later: {}", e),
//!     Err(e) => eprintln!("Giving up: {}", e),
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// The main error type for alert-publisher operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file or environment could not be loaded.
    #[error("Configuration error: {0}")]
    Settings(#[from] config::ConfigError),

    /// TLS credential file missing, unreadable or not PEM encoded.
    #[error("Credentials error for {path:?}: {message}")]
    Credentials {
        /// File that failed to load
        path: PathBuf,
        /// What went wrong
        message: String,
    },

    /// In-memory TLS material is not PEM encoded.
    #[error("Invalid {material}: {message}")]
    InvalidCredentials {
        /// Which part of the bundle, e.g. "client key"
        material: &'static str,
        message: String,
    },

    /// Opening a broker connection failed.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// A publish call failed.
    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Failure to establish a broker connection.
///
/// Fatal to the attempted connection. Nothing retries internally.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// Broker unreachable, name resolution failed or the handshake timed out.
    #[error("Network error while connecting: {0}")]
    Network(String),

    /// TLS negotiation failed (bad CA, certificate or key).
    #[error("TLS error while connecting: {0}")]
    Tls(String),

    /// The broker refused the client's credentials.
    #[error("Authentication error while connecting: {0}")]
    Auth(String),
}

/// Failure of a single publish call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// The connection was never opened, has been closed, or was lost.
    #[error("Not connected to broker")]
    NotConnected,

    /// No acknowledgment was observed within the request timeout.
    #[error("Publish timed out after {after:?}")]
    Timeout {
        /// The timeout that expired
        after: Duration,
    },

    /// The broker refused the record (leader not available, unknown topic, ...).
    #[error("Broker rejected record: {reason}")]
    BrokerRejected {
        /// Broker or client supplied reason
        reason: String,
    },

    /// The payload could not be turned into a valid envelope.
    ///
    /// This is a programming error on the caller's side and never succeeds
    /// on retry.
    #[error("Invalid payload: {0}")]
    SerializationInvalid(String),
}

impl PublishError {
    /// Whether a caller-side retry (with a fresh envelope and backoff) can
    /// plausibly succeed.
    ///
    /// `NotConnected` needs a new connection first, so it is not reported as
    /// retryable on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PublishError::Timeout { .. } | PublishError::BrokerRejected { .. }
        )
    }
}

impl From<serde_json::Error> for PublishError {
    fn from(err: serde_json::Error) -> Self {
        PublishError::SerializationInvalid(err.to_string())
    }
}

/// Failure while tearing a connection down.
///
/// Logged by callers and never propagated as the failure of a publish.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Disconnect error: {message}")]
pub struct DisconnectError {
    /// Description of the cleanup failure
    pub message: String,
}

impl DisconnectError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A convenient Result type alias for alert-publisher operations.
pub type Result<T> = std::result::Result<T, Error>;
