use crate::PublishError;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A domain record that can be carried as a message value.
pub trait Payload: Serialize + DeserializeOwned {
    /// Checks domain invariants before anything is put on the wire.
    fn validate(&self) -> std::result::Result<(), String> {
        Ok(())
    }
}

pub struct JsonSerializer;

impl JsonSerializer {
    /// Compact JSON in field declaration order, after validation.
    pub fn serialize<P: Payload>(payload: &P) -> Result<Vec<u8>, PublishError> {
        payload.validate().map_err(PublishError::SerializationInvalid)?;
        serde_json::to_vec(payload).map_err(Into::into)
    }

    /// Inverse of [`serialize`](Self::serialize); the decoded value is
    /// validated the same way.
    pub fn deserialize<P: Payload>(bytes: &[u8]) -> Result<P, PublishError> {
        let payload: P = serde_json::from_slice(bytes)?;
        payload.validate().map_err(PublishError::SerializationInvalid)?;
        Ok(payload)
    }
}
