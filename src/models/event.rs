use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    Sensor,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::Sensor => "sensor",
        }
    }
}

/// A finalized irrigation run. Never mutated after it is emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrrigationEvent {
    pub zone_id: String,
    pub field_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub total_gallons: f64,
    pub avg_flow_gpm: f64,
    pub source: EventSource,
}

impl IrrigationEvent {
    pub fn duration_minutes(&self) -> f64 {
        (self.end_time - self.start_time).num_milliseconds() as f64 / 60_000.0
    }
}
