use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Moderate,
    High,
    Critical,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Low => "Low",
            Urgency::Moderate => "Moderate",
            Urgency::High => "High",
            Urgency::Critical => "Critical",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Urgency::Low => "·",
            Urgency::Moderate => "→",
            Urgency::High => "⚠",
            Urgency::Critical => "!",
        }
    }
}

impl std::fmt::Display for Urgency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub label: String,
    pub value: String,
    pub source: String,
}

impl DataPoint {
    pub fn new(label: &str, value: impl std::fmt::Display, source: &str) -> Self {
        Self {
            label: label.to_string(),
            value: value.to_string(),
            source: source.to_string(),
        }
    }
}

/// Advice to split an application that would exceed the runoff cap.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitPlan {
    pub cycles: u32,
    pub per_cycle_mm: f64,
    pub interval_days: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneRecommendation {
    pub zone_name: String,
    pub multiplier_pct: f64,
    pub amount_mm: f64,
    pub runtime_hours: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrrigationRecommendation {
    pub field_id: String,
    pub urgency: Urgency,
    pub deficit_mm: f64,
    pub forecast_crop_et_mm: f64,
    /// Deficit plus forecast demand over the planning window. Reported only.
    pub target_mm: f64,
    /// First application, never above the runoff cap.
    pub amount_mm: f64,
    pub runtime_hours: f64,
    pub split_required: bool,
    pub split: Option<SplitPlan>,
    pub zones: Vec<ZoneRecommendation>,
    pub summary: String,
    pub data_points: Vec<DataPoint>,
    pub created_at: DateTime<Utc>,
}

impl IrrigationRecommendation {
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn with_data_point(
        mut self,
        label: &str,
        value: impl std::fmt::Display,
        source: &str,
    ) -> Self {
        self.data_points.push(DataPoint::new(label, value, source));
        self
    }

    pub fn with_zones(mut self, zones: Vec<ZoneRecommendation>) -> Self {
        self.zones = zones;
        self
    }

    pub fn needs_water(&self) -> bool {
        self.amount_mm > 0.0
    }
}
