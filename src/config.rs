use crate::kafka::{AckLevel, BrokerEndpoint, KeyStrategy, ProducerSettings, TlsBundle};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub broker: BrokerConfig,
    #[serde(default)]
    pub producer: ProducerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// CA certificate used to verify the broker.
    pub ca_path: PathBuf,
    /// Client access certificate.
    pub cert_path: PathBuf,
    /// Client access key.
    pub key_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProducerConfig {
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default)]
    pub ack_level: AckLevel,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub key_strategy: KeyStrategy,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            topic: default_topic(),
            ack_level: AckLevel::default(),
            request_timeout_ms: default_request_timeout_ms(),
            key_strategy: KeyStrategy::default(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("ALERT_PUBLISHER")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.broker.host.trim().is_empty() {
            return Err(Error::Config("broker.host must not be empty".to_string()));
        }
        if self.broker.port == 0 {
            return Err(Error::Config("broker.port must not be 0".to_string()));
        }
        if self.producer.topic.trim().is_empty() {
            return Err(Error::Config("producer.topic must not be empty".to_string()));
        }
        if self.producer.request_timeout_ms == 0 {
            return Err(Error::Config(
                "producer.request_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Reads the PEM material and builds the immutable endpoint.
    pub fn endpoint(&self) -> Result<BrokerEndpoint> {
        let tls = TlsBundle::load(
            &self.broker.ca_path,
            &self.broker.cert_path,
            &self.broker.key_path,
        )?;

        Ok(BrokerEndpoint::new(&self.broker.host, self.broker.port, tls)
            .with_client_id(&self.broker.client_id))
    }

    pub fn producer_settings(&self) -> ProducerSettings {
        ProducerSettings {
            ack_level: self.producer.ack_level,
            request_timeout: Duration::from_millis(self.producer.request_timeout_ms),
            key_strategy: self.producer.key_strategy.clone(),
        }
    }
}

fn default_client_id() -> String {
    "alert-publisher".to_string()
}

fn default_topic() -> String {
    "battery-alerts".to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}
