use super::key_strategy::KeyStrategy;
use super::serializer::{JsonSerializer, Payload};
use crate::PublishError;
use bytes::Bytes;
use chrono::{DateTime, SubsecRound, Utc};
use serde_json::Value;
use tracing::debug;

/// One record as it crosses the broker boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEnvelope {
    pub topic: String,
    pub key: Bytes,
    pub value: Bytes,
    /// Producer assigned send time, millisecond precision.
    pub timestamp: DateTime<Utc>,
}

impl MessageEnvelope {
    pub(crate) fn check(&self) -> Result<(), PublishError> {
        if self.topic.trim().is_empty() {
            return Err(PublishError::SerializationInvalid(
                "topic must not be empty".to_string(),
            ));
        }
        if self.value.is_empty() {
            return Err(PublishError::SerializationInvalid(
                "message value must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Decodes the value back into the payload it was built from.
    pub fn decode<P: Payload>(&self) -> Result<P, PublishError> {
        JsonSerializer::deserialize(&self.value)
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnvelopeBuilder {
    key_strategy: KeyStrategy,
}

impl EnvelopeBuilder {
    pub fn new(key_strategy: KeyStrategy) -> Self {
        Self { key_strategy }
    }

    pub fn key_strategy(&self) -> &KeyStrategy {
        &self.key_strategy
    }

    /// Validates and serializes `payload` and picks its key.
    ///
    /// Performs no I/O; every failure is `SerializationInvalid`.
    pub fn build<P: Payload>(&self, topic: &str, payload: &P) -> Result<MessageEnvelope, PublishError> {
        let value = JsonSerializer::serialize(payload)?;

        let record = if self.key_strategy.needs_record() {
            serde_json::to_value(payload)?
        } else {
            Value::Null
        };

        let key = self.key_strategy.extract_key(&record).ok_or_else(|| {
            PublishError::SerializationInvalid(format!(
                "key field missing from payload for strategy {:?}",
                self.key_strategy
            ))
        })?;

        let envelope = MessageEnvelope {
            topic: topic.to_string(),
            key: Bytes::from(key.into_bytes()),
            value: Bytes::from(value),
            timestamp: Utc::now().trunc_subsecs(3),
        };
        envelope.check()?;

        debug!(
            topic = %envelope.topic,
            key_len = envelope.key.len(),
            value_len = envelope.value.len(),
            "Built message envelope"
        );
        Ok(envelope)
    }
}
