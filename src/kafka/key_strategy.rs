use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

/// How the record key, and therefore the partition, is chosen.
///
/// `Random` spreads records evenly over partitions. `DerivedFromField`
/// pins every record of one entity (e.g. one `deviceId`) to one partition,
/// which is what gives per-entity ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    #[default]
    Random,
    /// Dot separated path into the serialized payload, e.g. `deviceId`.
    DerivedFromField(String),
}

impl KeyStrategy {
    /// Produces the key for one record. `None` means the configured field is
    /// missing or null in `record`.
    pub fn extract_key(&self, record: &Value) -> Option<String> {
        match self {
            KeyStrategy::Random => Some(Uuid::new_v4().hyphenated().to_string()),
            KeyStrategy::DerivedFromField(path) => extract_field_value(record, path),
        }
    }

    /// Whether extracting the key needs the payload as a JSON tree.
    pub(crate) fn needs_record(&self) -> bool {
        matches!(self, KeyStrategy::DerivedFromField(_))
    }
}

fn extract_field_value(record: &Value, field_path: &str) -> Option<String> {
    let mut current = record;

    for part in field_path.split('.') {
        match current.get(part) {
            Some(value) => current = value,
            None => {
                debug!("Field '{}' not found in record", part);
                return None;
            }
        }
    }

    match current {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => None,
        _ => Some(current.to_string()),
    }
}
