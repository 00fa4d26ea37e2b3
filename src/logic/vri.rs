use crate::error::{IrrigOpsError, Result};
use crate::models::{BandConfig, NdviRange, NdviRaster, VigorBand, VigorLevel, VriZone};
use std::collections::{BTreeMap, VecDeque};

/// Band a single NDVI value falls into, or `None` for no-data cells.
pub fn classify<'a>(value: f64, config: &'a BandConfig) -> Option<&'a VigorBand> {
    band_index(value, config).map(|idx| &config.bands[idx])
}

/// Bands must be sorted by `min_ndvi` with usable multipliers.
fn check_bands(config: &BandConfig) -> Result<()> {
    if config.bands.is_empty() {
        return Err(IrrigOpsError::Validation("band config has no bands".into()));
    }
    if !config.bands.windows(2).all(|w| w[0].min_ndvi < w[1].min_ndvi) {
        return Err(IrrigOpsError::Validation(
            "bands must be sorted by ascending min_ndvi".into(),
        ));
    }
    if let Some(band) = config
        .bands
        .iter()
        .find(|b| !b.multiplier_pct.is_finite() || b.multiplier_pct <= 0.0)
    {
        return Err(IrrigOpsError::Validation(format!(
            "{} multiplier must be a positive percentage, got {}",
            band.level, band.multiplier_pct
        )));
    }
    Ok(())
}

fn band_index(value: f64, config: &BandConfig) -> Option<usize> {
    if !value.is_finite() || config.bands.is_empty() {
        return None;
    }
    config
        .bands
        .iter()
        .rposition(|band| value >= band.min_ndvi)
        .or(Some(0))
}

/// Groups same-band cells into 4-connected zones.
///
/// Cells are scanned row-major and each flood fill is seeded from the first
/// unvisited cell, so identical rasters always yield identical zones in the
/// same order with the same names.
pub fn build_zones(raster: &NdviRaster, config: &BandConfig) -> Result<Vec<VriZone>> {
    if raster.values.len() != raster.width * raster.height {
        return Err(IrrigOpsError::Validation(format!(
            "raster is {}x{} but carries {} values",
            raster.width,
            raster.height,
            raster.values.len()
        )));
    }
    if raster.cell_area_acres <= 0.0 {
        return Err(IrrigOpsError::Validation(
            "cell_area_acres must be positive".into(),
        ));
    }
    check_bands(config)?;

    let labels: Vec<Option<usize>> = raster
        .values
        .iter()
        .map(|v| band_index(*v, config))
        .collect();

    let mut visited = vec![false; labels.len()];
    let mut counters: BTreeMap<VigorLevel, usize> = BTreeMap::new();
    let mut zones = Vec::new();

    for seed in 0..labels.len() {
        let Some(band_idx) = labels[seed] else {
            continue;
        };
        if visited[seed] {
            continue;
        }

        let mut queue = VecDeque::from([seed]);
        visited[seed] = true;
        let mut cells = 0usize;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;

        while let Some(idx) = queue.pop_front() {
            cells += 1;
            let v = raster.values[idx];
            min = min.min(v);
            max = max.max(v);

            for next in neighbours(idx, raster.width, raster.height) {
                if !visited[next] && labels[next] == Some(band_idx) {
                    visited[next] = true;
                    queue.push_back(next);
                }
            }
        }

        let band = &config.bands[band_idx];
        let n = counters.entry(band.level).or_insert(0);
        *n += 1;

        zones.push(VriZone {
            zone_name: format!("{} {}", band.level, n),
            ndvi_range: NdviRange { min, max },
            vigor_level: band.level,
            irrigation_multiplier_pct: band.multiplier_pct,
            area_acres: cells as f64 * raster.cell_area_acres,
        });
    }

    Ok(zones)
}

fn neighbours(idx: usize, width: usize, height: usize) -> impl Iterator<Item = usize> {
    let row = idx / width;
    let col = idx % width;
    [
        (row > 0).then(|| idx - width),
        (row + 1 < height).then(|| idx + width),
        (col > 0).then(|| idx - 1),
        (col + 1 < width).then(|| idx + 1),
    ]
    .into_iter()
    .flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_default_bands() {
        let config = BandConfig::default();
        let level = |v: f64| classify(v, &config).map(|b| b.level);
        assert_eq!(level(-0.4), Some(VigorLevel::Low));
        assert_eq!(level(0.29), Some(VigorLevel::Low));
        assert_eq!(level(0.3), Some(VigorLevel::MediumLow));
        assert_eq!(level(0.55), Some(VigorLevel::Medium));
        assert_eq!(level(0.65), Some(VigorLevel::MediumHigh));
        assert_eq!(level(0.7), Some(VigorLevel::High));
        assert_eq!(level(0.95), Some(VigorLevel::High));
        assert_eq!(level(f64::NAN), None);
    }

    #[test]
    fn three_value_strip() {
        let raster = NdviRaster::new(3, 1, 0.5, vec![0.2, 0.55, 0.75]);
        let zones = build_zones(&raster, &BandConfig::default()).unwrap();
        let summary: Vec<_> = zones
            .iter()
            .map(|z| (z.vigor_level, z.irrigation_multiplier_pct))
            .collect();
        assert_eq!(
            summary,
            vec![
                (VigorLevel::Low, 120.0),
                (VigorLevel::Medium, 100.0),
                (VigorLevel::High, 80.0),
            ]
        );
        assert!(zones.iter().all(|z| z.area_acres == 0.5));
    }

    #[test]
    fn contiguous_cells_merge_and_separate_patches_split() {
        // L L H
        // L H H
        // H L L
        let raster = NdviRaster::new(
            3,
            3,
            0.25,
            vec![0.1, 0.2, 0.8, 0.15, 0.9, 0.85, 0.75, 0.25, 0.05],
        );
        let zones = build_zones(&raster, &BandConfig::default()).unwrap();
        let names: Vec<_> = zones.iter().map(|z| z.zone_name.as_str()).collect();
        assert_eq!(
            names,
            vec!["Low Vigor 1", "High Vigor 1", "High Vigor 2", "Low Vigor 2"]
        );
        assert_eq!(zones[0].area_acres, 0.75);
        assert_eq!(zones[0].ndvi_range, NdviRange { min: 0.1, max: 0.2 });
        assert_eq!(zones[1].area_acres, 0.75);
        assert_eq!(zones[2].area_acres, 0.25);
        assert_eq!(zones[3].area_acres, 0.5);
    }

    #[test]
    fn no_data_cells_break_zones() {
        let raster = NdviRaster::new(3, 1, 1.0, vec![0.55, f64::NAN, 0.52]);
        let zones = build_zones(&raster, &BandConfig::default()).unwrap();
        assert_eq!(zones.len(), 2);
        assert_eq!(zones[1].zone_name, "Medium Vigor 2");
    }

    #[test]
    fn identical_input_identical_output() {
        let values: Vec<f64> = (0..64).map(|i| ((i * 37) % 100) as f64 / 100.0).collect();
        let raster = NdviRaster::new(8, 8, 0.1, values);
        let a = build_zones(&raster, &BandConfig::default()).unwrap();
        let b = build_zones(&raster, &BandConfig::default()).unwrap();
        assert_eq!(a, b);
        let total: f64 = a.iter().map(|z| z.area_acres).sum();
        assert!((total - 6.4).abs() < 1e-9);
    }

    #[test]
    fn custom_multipliers_flow_through() {
        let mut config = BandConfig::default();
        config.bands[0].multiplier_pct = 140.0;
        let raster = NdviRaster::new(1, 1, 1.0, vec![0.1]);
        let zones = build_zones(&raster, &config).unwrap();
        assert_eq!(zones[0].irrigation_multiplier_pct, 140.0);
    }

    #[test]
    fn unsorted_bands_rejected() {
        let mut config = BandConfig::default();
        config.bands.swap(1, 3);
        let raster = NdviRaster::new(1, 1, 1.0, vec![0.4]);
        assert!(matches!(
            build_zones(&raster, &config),
            Err(IrrigOpsError::Validation(_))
        ));
    }

    #[test]
    fn unusable_multiplier_rejected() {
        let mut config = BandConfig::default();
        config.bands[2].multiplier_pct = f64::NAN;
        let raster = NdviRaster::new(1, 1, 1.0, vec![0.55]);
        assert!(matches!(
            build_zones(&raster, &config),
            Err(IrrigOpsError::Validation(_))
        ));
    }

    #[test]
    fn mismatched_dimensions_rejected() {
        let raster = NdviRaster::new(2, 2, 1.0, vec![0.1, 0.2, 0.3]);
        assert!(matches!(
            build_zones(&raster, &BandConfig::default()),
            Err(IrrigOpsError::Validation(_))
        ));
    }
}
