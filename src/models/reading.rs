use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Webhook body as sent by a flow meter. Fields are kept loose so the
/// normalizer can report exactly what was wrong with them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawReading {
    #[serde(default)]
    pub flow_rate_gpm: Option<serde_json::Value>,
    #[serde(default)]
    pub zone_number: Option<u32>,
    #[serde(default)]
    pub cumulative_gallons: Option<serde_json::Value>,
    /// ISO-8601 / RFC 3339
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl RawReading {
    pub fn flow(flow_rate_gpm: f64) -> Self {
        Self {
            flow_rate_gpm: Some(serde_json::Value::from(flow_rate_gpm)),
            ..Default::default()
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp.to_rfc3339());
        self
    }

    pub fn zone(mut self, zone_number: u32) -> Self {
        self.zone_number = Some(zone_number);
        self
    }

    pub fn cumulative(mut self, gallons: f64) -> Self {
        self.cumulative_gallons = Some(serde_json::Value::from(gallons));
        self
    }
}

/// Canonical reading produced by the normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub device_id: String,
    pub zone_id: String,
    pub zone_number: u32,
    pub flow_rate_gpm: f64,
    pub cumulative_gallons: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Last point the detector accepted for a zone. Persisted so duplicate and
/// out-of-order sends are caught even across restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneCursor {
    pub zone_id: String,
    pub last_reading_at: DateTime<Utc>,
    pub last_cumulative_gallons: Option<f64>,
}
