use super::calculations::{mm_to_gallons, runtime_hours};
use crate::config::RecommendationConfig;
use crate::models::{
    FieldContext, IrrigationRecommendation, SplitPlan, Urgency, VriZone, ZoneRecommendation,
};
use chrono::Utc;

#[derive(Debug, Clone)]
pub struct RecommendationInputs<'a> {
    pub field: &'a FieldContext,
    pub deficit_mm: f64,
    pub forecast_crop_et_mm: f64,
    pub zones: &'a [VriZone],
}

/// Turns a field's deficit into an application amount and runtime.
///
/// Urgency tiers (by cumulative deficit):
/// - Critical: > 30mm
/// - High: 15-30mm
/// - Moderate: 8-15mm
/// - Low: < 8mm
///
/// A single application never exceeds the runoff cap; larger deficits are
/// reported as a split across cycles a few days apart. Forecast crop ET is
/// reported alongside as the demand expected over the planning window.
#[derive(Debug, Clone, Copy)]
pub struct RecommendationEngine {
    config: RecommendationConfig,
}

impl RecommendationEngine {
    pub fn new(config: RecommendationConfig) -> Self {
        Self { config }
    }

    pub fn classify(&self, deficit_mm: f64) -> Urgency {
        if deficit_mm > self.config.critical_mm {
            Urgency::Critical
        } else if deficit_mm >= self.config.high_mm {
            Urgency::High
        } else if deficit_mm >= self.config.moderate_mm {
            Urgency::Moderate
        } else {
            Urgency::Low
        }
    }

    pub fn recommend(&self, inputs: &RecommendationInputs<'_>) -> IrrigationRecommendation {
        let field = inputs.field;
        let cap = self.config.runoff_cap_mm;
        let deficit_mm = inputs.deficit_mm.max(0.0);
        let forecast_crop_et_mm = inputs.forecast_crop_et_mm.max(0.0);
        let target_mm = deficit_mm + forecast_crop_et_mm;

        let urgency = self.classify(deficit_mm);
        let amount_mm = deficit_mm.min(cap);
        let split_required = deficit_mm > cap;
        let split = split_required.then(|| SplitPlan {
            cycles: (deficit_mm / cap).ceil() as u32,
            per_cycle_mm: amount_mm,
            interval_days: self.config.split_interval_days,
        });

        let runtime = runtime_hours(mm_to_gallons(amount_mm, field.area_acres), field.flow_rate_gpm);

        let zones = inputs
            .zones
            .iter()
            .map(|zone| {
                let zone_mm = (amount_mm * zone.irrigation_multiplier_pct / 100.0).min(cap);
                ZoneRecommendation {
                    zone_name: zone.zone_name.clone(),
                    multiplier_pct: zone.irrigation_multiplier_pct,
                    amount_mm: zone_mm,
                    runtime_hours: runtime_hours(
                        mm_to_gallons(zone_mm, field.area_acres),
                        field.flow_rate_gpm,
                    ),
                }
            })
            .collect();

        let summary = match (urgency, split) {
            (_, Some(plan)) => format!(
                "Deficit of {:.1}mm exceeds the {:.0}mm runoff cap. Apply {:.1}mm now and \
                 repeat over {} cycles, {} days apart.",
                deficit_mm, cap, amount_mm, plan.cycles, plan.interval_days
            ),
            (Urgency::Low, None) if amount_mm <= 0.0 => {
                "Soil profile is at field capacity. No irrigation needed.".to_string()
            }
            (Urgency::Low, None) => format!(
                "Small deficit of {:.1}mm. Irrigation can wait for the next scheduled set.",
                deficit_mm
            ),
            (_, None) => format!(
                "Apply {:.1}mm ({:.1} hours at {:.0} GPM) to refill the root zone.",
                amount_mm, runtime, field.flow_rate_gpm
            ),
        };

        IrrigationRecommendation {
            field_id: field.field_id.clone(),
            urgency,
            deficit_mm,
            forecast_crop_et_mm,
            target_mm,
            amount_mm,
            runtime_hours: runtime,
            split_required,
            split,
            zones: Vec::new(),
            summary: String::new(),
            data_points: Vec::new(),
            created_at: Utc::now(),
        }
        .with_summary(summary)
        .with_zones(zones)
        .with_data_point("Deficit", format!("{:.1}mm", deficit_mm), "Water Balance")
        .with_data_point(
            "Forecast Crop ET",
            format!("{:.1}mm", forecast_crop_et_mm),
            "Climate Feed",
        )
        .with_data_point(
            "Demand Through Window",
            format!("{:.1}mm", target_mm),
            "Water Balance",
        )
        .with_data_point("Runoff Cap", format!("{:.0}mm", cap), "Configuration")
        .with_data_point(
            "Flow Rate",
            format!("{:.0} GPM", field.flow_rate_gpm),
            "Device Registry",
        )
    }
}

impl Default for RecommendationEngine {
    fn default() -> Self {
        Self::new(RecommendationConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::calculations::gallons_to_mm;
    use crate::models::{IrrigationMethod, NdviRange, VigorLevel};

    fn field() -> FieldContext {
        FieldContext {
            field_id: "block-a".into(),
            name: "Block A".into(),
            area_acres: 10.0,
            flow_rate_gpm: 200.0,
            method: IrrigationMethod::Drip,
            latitude: None,
            longitude: None,
        }
    }

    fn zone(name: &str, pct: f64) -> VriZone {
        VriZone {
            zone_name: name.into(),
            ndvi_range: NdviRange { min: 0.1, max: 0.2 },
            vigor_level: VigorLevel::Low,
            irrigation_multiplier_pct: pct,
            area_acres: 2.0,
        }
    }

    fn recommend(deficit: f64, forecast: f64, zones: &[VriZone]) -> IrrigationRecommendation {
        let field = field();
        RecommendationEngine::default().recommend(&RecommendationInputs {
            field: &field,
            deficit_mm: deficit,
            forecast_crop_et_mm: forecast,
            zones,
        })
    }

    #[test]
    fn urgency_tiers() {
        let engine = RecommendationEngine::default();
        assert_eq!(engine.classify(0.0), Urgency::Low);
        assert_eq!(engine.classify(7.9), Urgency::Low);
        assert_eq!(engine.classify(8.0), Urgency::Moderate);
        assert_eq!(engine.classify(14.9), Urgency::Moderate);
        assert_eq!(engine.classify(15.0), Urgency::High);
        assert_eq!(engine.classify(30.0), Urgency::High);
        assert_eq!(engine.classify(30.1), Urgency::Critical);
    }

    #[test]
    fn within_cap_applies_full_deficit() {
        let rec = recommend(12.0, 0.0, &[]);
        assert_eq!(rec.urgency, Urgency::Moderate);
        assert_eq!(rec.amount_mm, 12.0);
        assert!(!rec.split_required);
        assert!(rec.split.is_none());
    }

    #[test]
    fn runtime_matches_field_area_and_flow() {
        let rec = recommend(10.0, 0.0, &[]);
        let gallons = rec.runtime_hours * 60.0 * 200.0;
        assert!((gallons_to_mm(gallons, 10.0) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn above_cap_requires_split() {
        let rec = recommend(42.0, 3.0, &[]);
        assert_eq!(rec.urgency, Urgency::Critical);
        assert_eq!(rec.amount_mm, 25.0);
        assert!(rec.split_required);
        let plan = rec.split.unwrap();
        assert_eq!(plan.cycles, 2);
        assert_eq!(plan.interval_days, 2);
    }

    #[test]
    fn forecast_demand_is_reported_not_applied() {
        let rec = recommend(6.0, 4.0, &[]);
        assert_eq!(rec.target_mm, 10.0);
        assert_eq!(rec.urgency, Urgency::Low);
        assert_eq!(rec.amount_mm, 6.0);
    }

    #[test]
    fn forecast_alone_triggers_no_irrigation() {
        let rec = recommend(0.0, 9.0, &[]);
        assert_eq!(rec.amount_mm, 0.0);
        assert_eq!(rec.urgency, Urgency::Low);
        assert!(!rec.split_required);
    }

    #[test]
    fn deficit_under_cap_is_not_split_by_forecast() {
        let rec = recommend(20.0, 10.0, &[]);
        assert_eq!(rec.amount_mm, 20.0);
        assert_eq!(rec.urgency, Urgency::High);
        assert!(!rec.split_required);
        assert!(rec.split.is_none());
    }

    #[test]
    fn zero_deficit_needs_nothing() {
        let rec = recommend(0.0, 0.0, &[]);
        assert!(!rec.needs_water());
        assert_eq!(rec.runtime_hours, 0.0);
        assert!(rec.summary.contains("No irrigation needed"));
    }

    #[test]
    fn vri_multipliers_scale_zones_and_respect_cap() {
        let zones = [zone("Low Vigor 1", 120.0), zone("High Vigor 1", 80.0)];
        let rec = recommend(20.0, 0.0, &zones);
        assert_eq!(rec.zones.len(), 2);
        assert!((rec.zones[0].amount_mm - 24.0).abs() < 1e-9);
        assert!((rec.zones[1].amount_mm - 16.0).abs() < 1e-9);

        let capped = recommend(25.0, 0.0, &zones);
        assert_eq!(capped.zones[0].amount_mm, 25.0);
        assert!(capped.zones[1].runtime_hours < capped.runtime_hours);
    }
}
