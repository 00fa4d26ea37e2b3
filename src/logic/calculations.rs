use crate::models::IrrigationEvent;

pub const LITRES_PER_GALLON: f64 = 3.785_411_784;
pub const SQUARE_METRES_PER_ACRE: f64 = 4_046.856_422_4;

pub fn acres_to_square_metres(acres: f64) -> f64 {
    acres * SQUARE_METRES_PER_ACRE
}

/// Depth of water (mm) when `gallons` is spread evenly over `area_acres`.
/// One litre over one square metre is one millimetre.
pub fn gallons_to_mm(gallons: f64, area_acres: f64) -> f64 {
    let area_m2 = acres_to_square_metres(area_acres);
    if area_m2 <= 0.0 {
        return 0.0;
    }
    gallons * LITRES_PER_GALLON / area_m2
}

pub fn mm_to_gallons(mm: f64, area_acres: f64) -> f64 {
    mm * acres_to_square_metres(area_acres) / LITRES_PER_GALLON
}

/// Hours a valve must run at `flow_rate_gpm` to deliver `gallons`.
pub fn runtime_hours(gallons: f64, flow_rate_gpm: f64) -> f64 {
    if flow_rate_gpm <= 0.0 {
        return 0.0;
    }
    gallons / flow_rate_gpm / 60.0
}

/// Total depth applied to a field by a day's events
pub fn irrigation_depth_mm(events: &[IrrigationEvent], area_acres: f64) -> f64 {
    let gallons: f64 = events
        .iter()
        .map(|e| e.total_gallons)
        .filter(|g| *g > 0.0)
        .sum();
    gallons_to_mm(gallons, area_acres)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_acre_inch() {
        // 1 acre-inch is ~27,154 gallons
        let gallons = mm_to_gallons(25.4, 1.0);
        assert!((gallons - 27_154.0).abs() < 1.0);
        assert!((gallons_to_mm(gallons, 1.0) - 25.4).abs() < 1e-9);
    }

    #[test]
    fn zero_area_applies_nothing() {
        assert_eq!(gallons_to_mm(1_000.0, 0.0), 0.0);
    }

    #[test]
    fn runtime_from_flow() {
        assert!((runtime_hours(6_000.0, 50.0) - 2.0).abs() < 1e-9);
        assert_eq!(runtime_hours(6_000.0, 0.0), 0.0);
    }
}
