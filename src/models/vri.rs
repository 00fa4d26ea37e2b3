use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VigorLevel {
    Low,
    MediumLow,
    Medium,
    MediumHigh,
    High,
}

impl VigorLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            VigorLevel::Low => "Low Vigor",
            VigorLevel::MediumLow => "Medium-Low Vigor",
            VigorLevel::Medium => "Medium Vigor",
            VigorLevel::MediumHigh => "Medium-High Vigor",
            VigorLevel::High => "High Vigor",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s
            .to_lowercase()
            .replace(['-', ' ', '_'], "")
            .trim_end_matches("vigor")
        {
            "low" => Some(VigorLevel::Low),
            "mediumlow" => Some(VigorLevel::MediumLow),
            "medium" => Some(VigorLevel::Medium),
            "mediumhigh" => Some(VigorLevel::MediumHigh),
            "high" => Some(VigorLevel::High),
            _ => None,
        }
    }
}

impl std::fmt::Display for VigorLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A vigor band covers `[min_ndvi, next band's min_ndvi)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VigorBand {
    pub level: VigorLevel,
    pub min_ndvi: f64,
    pub multiplier_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandConfig {
    pub bands: Vec<VigorBand>,
}

impl Default for BandConfig {
    fn default() -> Self {
        Self {
            bands: vec![
                VigorBand {
                    level: VigorLevel::Low,
                    min_ndvi: -1.0,
                    multiplier_pct: 120.0,
                },
                VigorBand {
                    level: VigorLevel::MediumLow,
                    min_ndvi: 0.3,
                    multiplier_pct: 110.0,
                },
                VigorBand {
                    level: VigorLevel::Medium,
                    min_ndvi: 0.5,
                    multiplier_pct: 100.0,
                },
                VigorBand {
                    level: VigorLevel::MediumHigh,
                    min_ndvi: 0.6,
                    multiplier_pct: 90.0,
                },
                VigorBand {
                    level: VigorLevel::High,
                    min_ndvi: 0.7,
                    multiplier_pct: 80.0,
                },
            ],
        }
    }
}

/// Row-major NDVI grid. `NaN` marks cells with no data (clouds, roads).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NdviRaster {
    pub width: usize,
    pub height: usize,
    pub cell_area_acres: f64,
    pub values: Vec<f64>,
}

impl NdviRaster {
    pub fn new(width: usize, height: usize, cell_area_acres: f64, values: Vec<f64>) -> Self {
        Self {
            width,
            height,
            cell_area_acres,
            values,
        }
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.height || col >= self.width {
            return None;
        }
        self.values.get(row * self.width + col).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NdviRange {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VriZone {
    pub zone_name: String,
    pub ndvi_range: NdviRange,
    pub vigor_level: VigorLevel,
    pub irrigation_multiplier_pct: f64,
    pub area_acres: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vigor_level_from_str() {
        assert_eq!(VigorLevel::from_str("low"), Some(VigorLevel::Low));
        assert_eq!(
            VigorLevel::from_str("Medium-High Vigor"),
            Some(VigorLevel::MediumHigh)
        );
        assert_eq!(
            VigorLevel::from_str("medium_low"),
            Some(VigorLevel::MediumLow)
        );
        assert_eq!(VigorLevel::from_str("extreme"), None);
    }

    #[test]
    fn default_bands_are_ascending() {
        let config = BandConfig::default();
        assert_eq!(config.bands.len(), 5);
        assert!(config
            .bands
            .windows(2)
            .all(|w| w[0].min_ndvi < w[1].min_ndvi));
    }

    #[test]
    fn raster_get_bounds() {
        let raster = NdviRaster::new(2, 2, 0.1, vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(raster.get(1, 0), Some(0.3));
        assert_eq!(raster.get(0, 2), None);
        assert_eq!(raster.get(2, 0), None);
    }
}
