use crate::error::{IrrigOpsError, Result};
use crate::models::{DeviceZone, RawReading, Reading};
use crate::ports::DeviceRegistry;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Validates a webhook payload and resolves it to a canonical reading.
///
/// Payload checks run before the registry lookup so a malformed body is
/// reported as such even when the token is also bad.
pub fn normalize(
    registry: &dyn DeviceRegistry,
    device_token: &str,
    raw: &RawReading,
    received_at: DateTime<Utc>,
) -> Result<(Reading, DeviceZone)> {
    let flow_rate_gpm = match raw.flow_rate_gpm.as_ref() {
        Some(v) => parse_number("flow_rate_gpm", v)?,
        None => {
            return Err(IrrigOpsError::Validation(
                "flow_rate_gpm is required".into(),
            ))
        }
    };

    let cumulative_gallons = raw
        .cumulative_gallons
        .as_ref()
        .filter(|v| !v.is_null())
        .map(|v| parse_number("cumulative_gallons", v))
        .transpose()?;

    let timestamp = match raw.timestamp.as_deref() {
        Some(s) => parse_timestamp(s)?,
        None => received_at,
    };

    let zone = registry.resolve_device_zone(device_token, raw.zone_number)?;

    let reading = Reading {
        device_id: zone.device_id.clone(),
        zone_id: zone.zone_id.clone(),
        zone_number: zone.zone_number,
        flow_rate_gpm,
        cumulative_gallons,
        timestamp,
    };

    Ok((reading, zone))
}

/// Accepts JSON numbers and numeric strings; rejects negatives and
/// non-finite values.
pub fn parse_number(field: &str, value: &Value) -> Result<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match parsed {
        Some(v) if !v.is_finite() => Err(IrrigOpsError::Validation(format!(
            "{} must be finite",
            field
        ))),
        Some(v) if v < 0.0 => Err(IrrigOpsError::Validation(format!(
            "{} must be >= 0, got {}",
            field, v
        ))),
        Some(v) => Ok(v),
        None => Err(IrrigOpsError::Validation(format!(
            "{} must be numeric, got {}",
            field, value
        ))),
    }
}

pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| IrrigOpsError::Validation(format!("timestamp '{}' is not ISO-8601: {}", s, e)))
}
