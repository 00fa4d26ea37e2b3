use crate::config::WaterBalanceConfig;
use crate::error::Result;
use crate::models::{
    clamp_moisture, DailyInputs, WaterBalanceReport, WaterBalanceState, FIELD_CAPACITY_PCT,
    WILTING_POINT_PCT,
};

/// Daily field water balance over a three-layer soil profile.
///
/// Surface responds to the day's ET and infiltration directly, the mid layer
/// mirrors the cumulative deficit against available water, and the deep layer
/// drifts toward the mid layer slowly so only multi-day trends move it.
#[derive(Debug, Clone)]
pub struct WaterBalanceCalculator {
    config: WaterBalanceConfig,
}

impl WaterBalanceCalculator {
    pub fn new(config: WaterBalanceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WaterBalanceConfig {
        &self.config
    }

    /// Applies one day to `state`. A day at or before `last_updated` has
    /// already been counted and is returned unchanged.
    pub fn apply_day(
        &self,
        state: &WaterBalanceState,
        inputs: &DailyInputs,
    ) -> Result<WaterBalanceReport> {
        let growth_stage = self.config.stage_for(inputs.date)?;
        let kc = self.config.kc_for(growth_stage)?;
        let crop_et_mm = inputs.reference_et_mm.max(0.0) * kc;
        let water_in_mm = inputs.irrigation_mm.max(0.0) + inputs.rainfall_mm.max(0.0);

        if state.last_updated.is_some_and(|d| d >= inputs.date) {
            return Ok(WaterBalanceReport {
                state: state.clone(),
                growth_stage,
                kc,
                crop_et_mm,
                water_in_mm,
                surplus_mm: 0.0,
                applied: false,
            });
        }

        let raw_deficit = state.cumulative_deficit_mm + crop_et_mm - water_in_mm;
        let cumulative_deficit_mm = raw_deficit.max(0.0);
        let surplus_mm = (-raw_deficit).max(0.0);

        let soil = &self.config.soil;
        let layer_surface_pct = clamp_moisture(
            state.layer_surface_pct - crop_et_mm * soil.surface_et_pct_per_mm
                + water_in_mm * soil.surface_infiltration_pct_per_mm,
        );

        let depletion = (cumulative_deficit_mm / soil.total_available_water_mm).min(1.0);
        let layer_mid_pct =
            clamp_moisture(FIELD_CAPACITY_PCT - depletion * (FIELD_CAPACITY_PCT - WILTING_POINT_PCT));

        let layer_deep_pct = clamp_moisture(
            state.layer_deep_pct + (layer_mid_pct - state.layer_deep_pct) * soil.deep_response_rate,
        );

        tracing::debug!(
            field_id = %state.field_id,
            date = %inputs.date,
            stage = %growth_stage,
            crop_et_mm,
            water_in_mm,
            deficit_mm = cumulative_deficit_mm,
            "Water balance updated"
        );

        Ok(WaterBalanceReport {
            state: WaterBalanceState {
                field_id: state.field_id.clone(),
                layer_surface_pct,
                layer_mid_pct,
                layer_deep_pct,
                cumulative_deficit_mm,
                last_updated: Some(inputs.date),
            },
            growth_stage,
            kc,
            crop_et_mm,
            water_in_mm,
            surplus_mm,
            applied: true,
        })
    }

    /// Crop ET expected over a forecast window, using each day's own stage.
    pub fn forecast_crop_et(
        &self,
        start: chrono::NaiveDate,
        reference_et_mm: &[f64],
    ) -> Result<f64> {
        let mut total = 0.0;
        for (i, et0) in reference_et_mm.iter().enumerate() {
            let date = start + chrono::Duration::days(i as i64);
            let kc = self.config.kc_for(self.config.stage_for(date)?)?;
            total += et0.max(0.0) * kc;
        }
        Ok(total)
    }
}

impl Default for WaterBalanceCalculator {
    fn default() -> Self {
        Self::new(WaterBalanceConfig::default())
    }
}
