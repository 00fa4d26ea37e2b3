use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IrrigationMethod {
    Drip,
    MicroSprinkler,
    Sprinkler,
    Flood,
}

impl IrrigationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            IrrigationMethod::Drip => "Drip",
            IrrigationMethod::MicroSprinkler => "Micro-Sprinkler",
            IrrigationMethod::Sprinkler => "Sprinkler",
            IrrigationMethod::Flood => "Flood",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace(['-', ' ', '_'], "").as_str() {
            "drip" => Some(IrrigationMethod::Drip),
            "microsprinkler" | "micro" => Some(IrrigationMethod::MicroSprinkler),
            "sprinkler" | "overhead" => Some(IrrigationMethod::Sprinkler),
            "flood" | "furrow" => Some(IrrigationMethod::Flood),
            _ => None,
        }
    }
}

impl std::fmt::Display for IrrigationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A valve zone on a flow-monitoring device, as resolved by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceZone {
    pub device_id: String,
    pub zone_number: u32,
    pub zone_id: String,
    pub field_id: String,
    pub flow_rate_gpm: f64,
    pub method: IrrigationMethod,
}

impl DeviceZone {
    pub fn zone_id_for(device_id: &str, zone_number: u32) -> String {
        format!("{}:{}", device_id, zone_number)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldContext {
    pub field_id: String,
    pub name: String,
    pub area_acres: f64,
    pub flow_rate_gpm: f64,
    pub method: IrrigationMethod,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}
