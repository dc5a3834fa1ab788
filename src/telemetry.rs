//! Device telemetry payloads.
//!
//! [`BatteryAlert`] is the record published to the `battery-alerts` topic.
//! On the wire it is JSON with camelCase field names:
//!
//! ```json
//! {"deviceId":"securityCam-front-1","batteryPercent":14,"timeStamp":"2024-01-01T00:00:00.000Z"}
//! ```

use crate::kafka::Payload;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Highest accepted battery charge.
pub const MAX_BATTERY_PERCENT: u8 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatteryAlert {
    pub device_id: String,
    pub battery_percent: u8,
    #[serde(with = "iso_millis")]
    pub time_stamp: DateTime<Utc>,
}

impl BatteryAlert {
    /// Builds an alert, truncating the timestamp to the millisecond
    /// precision it is serialized with.
    pub fn new(device_id: impl Into<String>, battery_percent: u8, time_stamp: DateTime<Utc>) -> Self {
        Self {
            device_id: device_id.into(),
            battery_percent,
            time_stamp: time_stamp.trunc_subsecs(3),
        }
    }

    /// An alert stamped with the current time.
    pub fn now(device_id: impl Into<String>, battery_percent: u8) -> Self {
        Self::new(device_id, battery_percent, Utc::now())
    }
}

impl Payload for BatteryAlert {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.device_id.trim().is_empty() {
            return Err("deviceId must not be empty".to_string());
        }
        if self.battery_percent > MAX_BATTERY_PERCENT {
            return Err(format!(
                "batteryPercent {} is outside 0..={}",
                self.battery_percent, MAX_BATTERY_PERCENT
            ));
        }
        Ok(())
    }
}

/// ISO-8601 UTC with exactly three fractional digits and a `Z` suffix.
pub mod iso_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
