pub mod config;
pub mod error;
pub mod telemetry;

pub mod kafka;

pub use config::Config;
pub use error::{ConnectError, DisconnectError, Error, PublishError, Result};
pub use kafka::{publish_once, AckLevel, BrokerEndpoint, KeyStrategy, Producer, ProducerSettings, PublishResult};
pub use telemetry::BatteryAlert;
