use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const FIELD_CAPACITY_PCT: f64 = 100.0;
pub const WILTING_POINT_PCT: f64 = 30.0;

pub fn clamp_moisture(pct: f64) -> f64 {
    pct.clamp(WILTING_POINT_PCT, FIELD_CAPACITY_PCT)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrowthStage {
    Dormant,
    Budbreak,
    Flowering,
    FruitSet,
    Veraison,
    Harvest,
    PostHarvest,
}

impl GrowthStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrowthStage::Dormant => "Dormant",
            GrowthStage::Budbreak => "Budbreak",
            GrowthStage::Flowering => "Flowering",
            GrowthStage::FruitSet => "Fruit Set",
            GrowthStage::Veraison => "Veraison",
            GrowthStage::Harvest => "Harvest",
            GrowthStage::PostHarvest => "Post-Harvest",
        }
    }

    pub fn all() -> &'static [GrowthStage] {
        &[
            GrowthStage::Dormant,
            GrowthStage::Budbreak,
            GrowthStage::Flowering,
            GrowthStage::FruitSet,
            GrowthStage::Veraison,
            GrowthStage::Harvest,
            GrowthStage::PostHarvest,
        ]
    }
}

impl std::fmt::Display for GrowthStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaterBalanceState {
    pub field_id: String,
    pub layer_surface_pct: f64,
    pub layer_mid_pct: f64,
    pub layer_deep_pct: f64,
    pub cumulative_deficit_mm: f64,
    pub last_updated: Option<NaiveDate>,
}

impl WaterBalanceState {
    /// A field with no history starts at field capacity.
    pub fn at_field_capacity(field_id: impl Into<String>) -> Self {
        Self {
            field_id: field_id.into(),
            layer_surface_pct: FIELD_CAPACITY_PCT,
            layer_mid_pct: FIELD_CAPACITY_PCT,
            layer_deep_pct: FIELD_CAPACITY_PCT,
            cumulative_deficit_mm: 0.0,
            last_updated: None,
        }
    }
}

/// One day's inputs to the balance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyInputs {
    pub date: NaiveDate,
    pub reference_et_mm: f64,
    pub irrigation_mm: f64,
    pub rainfall_mm: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaterBalanceReport {
    pub state: WaterBalanceState,
    pub growth_stage: GrowthStage,
    pub kc: f64,
    pub crop_et_mm: f64,
    pub water_in_mm: f64,
    /// Water applied beyond the outstanding deficit. Reported, never banked.
    pub surplus_mm: f64,
    /// False when the day had already been applied.
    pub applied: bool,
}
