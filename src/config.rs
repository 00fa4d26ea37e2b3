use crate::error::{IrrigOpsError, Result};
use crate::models::{BandConfig, GrowthStage};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub noise_filter: NoiseFilterConfig,
    #[serde(default)]
    pub water_balance: WaterBalanceConfig,
    #[serde(default)]
    pub recommendation: RecommendationConfig,
    #[serde(default)]
    pub vri: BandConfig,
    #[serde(default)]
    pub open_meteo: Option<OpenMeteoConfig>,
    #[serde(default)]
    pub registry: RegistryConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct DetectorConfig {
    pub start_threshold_gpm: f64,
    pub end_threshold_gpm: f64,
    /// Consecutive readings at or above start before a session opens.
    pub start_readings: u32,
    /// Consecutive readings below end before a session closes.
    pub end_readings: u32,
    #[serde(default = "default_stale_after_minutes")]
    pub stale_after_minutes: i64,
}

fn default_stale_after_minutes() -> i64 {
    60
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            start_threshold_gpm: 0.5,
            end_threshold_gpm: 0.2,
            start_readings: 3,
            end_readings: 4,
            stale_after_minutes: default_stale_after_minutes(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct NoiseFilterConfig {
    pub min_duration_minutes: f64,
    pub min_gallons: f64,
}

impl Default for NoiseFilterConfig {
    fn default() -> Self {
        Self {
            min_duration_minutes: 3.0,
            min_gallons: 5.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WaterBalanceConfig {
    pub kc: BTreeMap<GrowthStage, f64>,
    /// Calendar month (1-12) to phenological stage.
    pub stage_calendar: BTreeMap<u32, GrowthStage>,
    #[serde(default)]
    pub soil: SoilConfig,
}

impl WaterBalanceConfig {
    pub fn stage_for(&self, date: NaiveDate) -> Result<GrowthStage> {
        self.stage_calendar
            .get(&date.month())
            .copied()
            .ok_or_else(|| {
                IrrigOpsError::Config(format!("No growth stage configured for month {}", date.month()))
            })
    }

    pub fn kc_for(&self, stage: GrowthStage) -> Result<f64> {
        self.kc
            .get(&stage)
            .copied()
            .ok_or_else(|| IrrigOpsError::Config(format!("No Kc configured for stage {}", stage)))
    }
}

impl Default for WaterBalanceConfig {
    fn default() -> Self {
        let kc = BTreeMap::from([
            (GrowthStage::Dormant, 0.30),
            (GrowthStage::Budbreak, 0.45),
            (GrowthStage::Flowering, 0.70),
            (GrowthStage::FruitSet, 0.85),
            (GrowthStage::Veraison, 0.90),
            (GrowthStage::Harvest, 0.75),
            (GrowthStage::PostHarvest, 0.50),
        ]);

        // Northern-hemisphere wine grape calendar
        let stage_calendar = BTreeMap::from([
            (1, GrowthStage::Dormant),
            (2, GrowthStage::Dormant),
            (3, GrowthStage::Budbreak),
            (4, GrowthStage::Budbreak),
            (5, GrowthStage::Flowering),
            (6, GrowthStage::FruitSet),
            (7, GrowthStage::Veraison),
            (8, GrowthStage::Veraison),
            (9, GrowthStage::Harvest),
            (10, GrowthStage::PostHarvest),
            (11, GrowthStage::PostHarvest),
            (12, GrowthStage::Dormant),
        ]);

        Self {
            kc,
            stage_calendar,
            soil: SoilConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct SoilConfig {
    /// Plant-available water held by the root zone between field capacity
    /// and wilting point.
    pub total_available_water_mm: f64,
    pub surface_et_pct_per_mm: f64,
    pub surface_infiltration_pct_per_mm: f64,
    /// Fraction of the gap to the mid layer the deep layer closes per day.
    pub deep_response_rate: f64,
}

impl Default for SoilConfig {
    fn default() -> Self {
        Self {
            total_available_water_mm: 100.0,
            surface_et_pct_per_mm: 4.0,
            surface_infiltration_pct_per_mm: 5.0,
            deep_response_rate: 0.15,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct RecommendationConfig {
    pub runoff_cap_mm: f64,
    pub forecast_days: u32,
    pub split_interval_days: u32,
    pub critical_mm: f64,
    pub high_mm: f64,
    pub moderate_mm: f64,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            runoff_cap_mm: 25.0,
            forecast_days: 3,
            split_interval_days: 2,
            critical_mm: 30.0,
            high_mm: 15.0,
            moderate_mm: 8.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OpenMeteoConfig {
    #[serde(default = "default_open_meteo_url")]
    pub base_url: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_open_meteo_url() -> String {
    "https://api.open-meteo.com/v1".into()
}

fn default_enabled() -> bool {
    true
}

impl Default for OpenMeteoConfig {
    fn default() -> Self {
        Self {
            base_url: default_open_meteo_url(),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub fields: Vec<FieldEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FieldEntry {
    pub id: String,
    pub name: String,
    pub area_acres: f64,
    pub flow_rate_gpm: f64,
    pub method: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

#[derive(Clone, Deserialize, Serialize)]
pub struct DeviceEntry {
    pub device_id: String,
    pub token: String,
    pub zones: Vec<ZoneEntry>,
}

impl std::fmt::Debug for DeviceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceEntry")
            .field("device_id", &self.device_id)
            .field("token", &"[REDACTED]")
            .field("zones", &self.zones)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ZoneEntry {
    pub number: u32,
    /// Falls back to the field's flow rate.
    pub flow_rate_gpm: Option<f64>,
}

impl Config {
    pub fn load(config_override: Option<PathBuf>) -> Result<Self> {
        let config_path = match config_override {
            Some(p) => p,
            None => Self::find_config_path()?,
        };

        if !config_path.exists() {
            return Err(IrrigOpsError::Config(format!(
                "Config file not found at {:?}. Copy config/config.yaml.example to get started.",
                config_path
            )));
        }

        let config_str = std::fs::read_to_string(&config_path)
            .map_err(|e| IrrigOpsError::Config(format!("Failed to read config: {}", e)))?;

        Self::from_yaml(&config_str)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = Self::substitute_env_vars(content)?;

        let config: Config = serde_yaml::from_str(&config_str)
            .map_err(|e| IrrigOpsError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let d = &self.detector;
        if !(d.end_threshold_gpm >= 0.0 && d.end_threshold_gpm < d.start_threshold_gpm) {
            return Err(IrrigOpsError::Config(format!(
                "end_threshold_gpm ({}) must be non-negative and below start_threshold_gpm ({})",
                d.end_threshold_gpm, d.start_threshold_gpm
            )));
        }
        if d.start_readings == 0 || d.end_readings == 0 {
            return Err(IrrigOpsError::Config(
                "start_readings and end_readings must be at least 1".into(),
            ));
        }

        for stage in GrowthStage::all() {
            self.water_balance.kc_for(*stage)?;
        }
        for month in 1..=12 {
            if !self.water_balance.stage_calendar.contains_key(&month) {
                return Err(IrrigOpsError::Config(format!(
                    "stage_calendar is missing month {}",
                    month
                )));
            }
        }
        if self.water_balance.soil.total_available_water_mm <= 0.0 {
            return Err(IrrigOpsError::Config(
                "total_available_water_mm must be positive".into(),
            ));
        }
        let rate = self.water_balance.soil.deep_response_rate;
        if !(0.0..=1.0).contains(&rate) {
            return Err(IrrigOpsError::Config(format!(
                "deep_response_rate must be within 0..=1, got {}",
                rate
            )));
        }

        let r = &self.recommendation;
        if r.runoff_cap_mm <= 0.0 {
            return Err(IrrigOpsError::Config("runoff_cap_mm must be positive".into()));
        }
        if !(r.critical_mm > r.high_mm && r.high_mm > r.moderate_mm) {
            return Err(IrrigOpsError::Config(
                "urgency thresholds must satisfy critical_mm > high_mm > moderate_mm".into(),
            ));
        }

        if self.vri.bands.is_empty() {
            return Err(IrrigOpsError::Config("vri.bands must not be empty".into()));
        }
        if !self.vri.bands.windows(2).all(|w| w[0].min_ndvi < w[1].min_ndvi) {
            return Err(IrrigOpsError::Config(
                "vri.bands must be sorted by ascending min_ndvi".into(),
            ));
        }

        Ok(())
    }

    /// Search for config.yaml in standard locations.
    /// Returns the path of the first found config, or the XDG default path if none found.
    fn find_config_path() -> Result<PathBuf> {
        let local_config = PathBuf::from("config/config.yaml");
        if local_config.exists() {
            return Ok(local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let xdg_config = config_dir.join("irrigops").join("config.yaml");
            if xdg_config.exists() {
                return Ok(xdg_config);
            }
        }

        // Return XDG path as the default (will trigger "not found" in load)
        let default_path = dirs::config_dir()
            .ok_or_else(|| IrrigOpsError::Config("Cannot determine config directory".into()))?
            .join("irrigops")
            .join("config.yaml");
        Ok(default_path)
    }

    fn substitute_env_vars(content: &str) -> Result<String> {
        let mut result = content.to_string();

        let re = regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")
            .map_err(|e| IrrigOpsError::Config(format!("Bad substitution pattern: {}", e)))?;

        for cap in re.captures_iter(content) {
            let var_name = &cap[1];
            let placeholder = &cap[0];
            if let Ok(value) = std::env::var(var_name) {
                result = result.replace(placeholder, &value);
            }
        }

        Ok(result)
    }

    pub fn data_dir(data_dir_override: Option<&PathBuf>) -> Result<PathBuf> {
        // CLI override takes priority
        if let Some(dir) = data_dir_override {
            std::fs::create_dir_all(dir)?;
            return Ok(dir.clone());
        }

        if let Ok(dir) = std::env::var("IRRIGOPS_DATA_DIR") {
            let p = PathBuf::from(dir);
            std::fs::create_dir_all(&p)?;
            return Ok(p);
        }

        let data_dir = dirs::data_dir()
            .ok_or_else(|| IrrigOpsError::Config("Cannot determine data directory".into()))?
            .join("irrigops");

        std::fs::create_dir_all(&data_dir)?;
        Ok(data_dir)
    }

    pub fn db_path(data_dir_override: Option<&PathBuf>) -> Result<PathBuf> {
        Ok(Self::data_dir(data_dir_override)?.join("irrigops.db"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn default_kc_table() {
        let wb = WaterBalanceConfig::default();
        assert_eq!(wb.kc_for(GrowthStage::Dormant).unwrap(), 0.30);
        assert_eq!(wb.kc_for(GrowthStage::Veraison).unwrap(), 0.90);
        let july = NaiveDate::from_ymd_opt(2026, 7, 15).unwrap();
        assert_eq!(wb.stage_for(july).unwrap(), GrowthStage::Veraison);
    }

    #[test]
    fn partial_yaml_falls_back_to_defaults() {
        let yaml = r#"
detector:
  start_threshold_gpm: 1.0
  end_threshold_gpm: 0.4
  start_readings: 2
  end_readings: 5
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.detector.start_readings, 2);
        assert_eq!(config.detector.stale_after_minutes, 60);
        assert_eq!(config.recommendation.runoff_cap_mm, 25.0);
        assert_eq!(config.vri.bands.len(), 5);
    }

    #[test]
    fn kc_table_is_swappable() {
        let yaml = r#"
water_balance:
  kc:
    dormant: 0.2
    budbreak: 0.4
    flowering: 0.6
    fruit_set: 0.8
    veraison: 0.8
    harvest: 0.7
    post_harvest: 0.4
  stage_calendar:
    1: dormant
    2: dormant
    3: dormant
    4: budbreak
    5: budbreak
    6: flowering
    7: fruit_set
    8: veraison
    9: veraison
    10: harvest
    11: post_harvest
    12: dormant
"#;
        let config = Config::from_yaml(yaml).unwrap();
        let wb = &config.water_balance;
        assert_eq!(wb.kc_for(GrowthStage::Dormant).unwrap(), 0.2);
        let march = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        assert_eq!(wb.stage_for(march).unwrap(), GrowthStage::Dormant);
    }

    #[test]
    fn inverted_thresholds_rejected() {
        let mut config = Config::default();
        config.detector.end_threshold_gpm = 0.8;
        assert!(matches!(config.validate(), Err(IrrigOpsError::Config(_))));
    }

    #[test]
    fn missing_month_rejected() {
        let mut config = Config::default();
        config.water_balance.stage_calendar.remove(&6);
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_vars_substituted() {
        std::env::set_var("IRRIGOPS_TEST_TOKEN", "s3cret");
        let out = Config::substitute_env_vars("token: ${IRRIGOPS_TEST_TOKEN}").unwrap();
        assert_eq!(out, "token: s3cret");
        let untouched = Config::substitute_env_vars("token: ${IRRIGOPS_UNSET_VAR}").unwrap();
        assert_eq!(untouched, "token: ${IRRIGOPS_UNSET_VAR}");
    }

    #[test]
    fn device_token_redacted_in_debug() {
        let entry = DeviceEntry {
            device_id: "meter-1".into(),
            token: "hunter2".into(),
            zones: vec![],
        };
        let debug = format!("{:?}", entry);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }
}
