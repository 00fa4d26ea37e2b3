//! Collaborator interfaces the engine consumes. `Database` implements the
//! storage and registry traits; `OpenMeteoClient` implements `ClimateFeed`.

use crate::error::{IrrigOpsError, Result};
use crate::models::{
    Alert, DeviceZone, FieldContext, IrrigationEvent, Session, VriZone, WaterBalanceState,
    ZoneCursor,
};
use chrono::NaiveDate;
use std::future::Future;

pub trait DeviceRegistry: Send + Sync {
    /// All zones wired to the device behind `device_token`.
    /// Fails with `NotFound` when the token is unknown.
    fn zones_for_device(&self, device_token: &str) -> Result<Vec<DeviceZone>>;

    fn field(&self, field_id: &str) -> Result<FieldContext>;

    fn resolve_device_zone(
        &self,
        device_token: &str,
        zone_number: Option<u32>,
    ) -> Result<DeviceZone> {
        let zones = self.zones_for_device(device_token)?;
        match zone_number {
            Some(n) => zones
                .into_iter()
                .find(|z| z.zone_number == n)
                .ok_or_else(|| {
                    IrrigOpsError::Validation(format!("zone {} is not configured on this device", n))
                }),
            None if zones.len() <= 1 => zones
                .into_iter()
                .next()
                .ok_or_else(|| IrrigOpsError::NotFound("device has no zones".into())),
            None => Err(IrrigOpsError::Validation(format!(
                "zone_number is required: device has {} zones",
                zones.len()
            ))),
        }
    }
}

pub trait SessionStore: Send + Sync {
    fn load_session(&self, zone_id: &str) -> Result<Option<Session>>;
    fn save_session(&self, session: &Session) -> Result<()>;
    fn clear_session(&self, zone_id: &str) -> Result<()>;
    fn active_sessions(&self) -> Result<Vec<Session>>;
    fn load_cursor(&self, zone_id: &str) -> Result<Option<ZoneCursor>>;
    fn save_cursor(&self, cursor: &ZoneCursor) -> Result<()>;
}

pub trait EventLog: Send + Sync {
    /// Must be idempotent on `(zone_id, start_time)` so a replayed append
    /// after a partial failure does not duplicate the event.
    fn append_event(&self, event: &IrrigationEvent) -> Result<()>;
    fn events_for_field_on(&self, field_id: &str, date: NaiveDate) -> Result<Vec<IrrigationEvent>>;
}

pub trait WaterBalanceStore: Send + Sync {
    fn load_water_balance(&self, field_id: &str) -> Result<Option<WaterBalanceState>>;
    fn save_water_balance(&self, state: &WaterBalanceState) -> Result<()>;
}

pub trait VriZoneStore: Send + Sync {
    fn save_zones(&self, field_id: &str, zones: &[VriZone]) -> Result<()>;
    fn load_zones(&self, field_id: &str) -> Result<Vec<VriZone>>;
    fn update_multiplier(&self, field_id: &str, zone_name: &str, multiplier_pct: f64) -> Result<()>;
}

/// Everything the engine persists through. Blanket-implemented.
pub trait Store: SessionStore + EventLog + WaterBalanceStore + VriZoneStore {}

impl<T: SessionStore + EventLog + WaterBalanceStore + VriZoneStore> Store for T {}

/// One day of climate inputs for the water balance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClimateDay {
    pub reference_et_mm: f64,
    pub rainfall_mm: f64,
}

/// Daily climate data for a field, in millimetres.
pub trait ClimateFeed: Send + Sync {
    fn reference_et(
        &self,
        field: &FieldContext,
        date: NaiveDate,
    ) -> impl Future<Output = Result<f64>> + Send;

    fn rainfall(
        &self,
        field: &FieldContext,
        date: NaiveDate,
    ) -> impl Future<Output = Result<f64>> + Send;

    /// Reference ET for `days` days starting at `start`.
    fn forecast_reference_et(
        &self,
        field: &FieldContext,
        start: NaiveDate,
        days: u32,
    ) -> impl Future<Output = Result<Vec<f64>>> + Send;

    /// Reference ET and rainfall together. Feeds that serve both from one
    /// request should override this.
    fn climate_day(
        &self,
        field: &FieldContext,
        date: NaiveDate,
    ) -> impl Future<Output = Result<ClimateDay>> + Send {
        async move {
            Ok(ClimateDay {
                reference_et_mm: self.reference_et(field, date).await?,
                rainfall_mm: self.rainfall(field, date).await?,
            })
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, alert: &Alert);
}

/// Routes alerts into the log stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, alert: &Alert) {
        tracing::warn!(
            kind = %alert.kind,
            subject = %alert.subject,
            "{}",
            alert.message
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IrrigationMethod;

    struct TwoZoneRegistry;

    impl DeviceRegistry for TwoZoneRegistry {
        fn zones_for_device(&self, device_token: &str) -> Result<Vec<DeviceZone>> {
            let zone = |n: u32| DeviceZone {
                device_id: "meter-1".into(),
                zone_number: n,
                zone_id: DeviceZone::zone_id_for("meter-1", n),
                field_id: "block-a".into(),
                flow_rate_gpm: 40.0,
                method: IrrigationMethod::Drip,
            };
            match device_token {
                "two" => Ok(vec![zone(1), zone(2)]),
                "one" => Ok(vec![zone(1)]),
                _ => Err(IrrigOpsError::NotFound(format!("device token {}", device_token))),
            }
        }

        fn field(&self, field_id: &str) -> Result<FieldContext> {
            Err(IrrigOpsError::NotFound(field_id.into()))
        }
    }

    #[test]
    fn single_zone_device_needs_no_zone_number() {
        let zone = TwoZoneRegistry.resolve_device_zone("one", None).unwrap();
        assert_eq!(zone.zone_id, "meter-1:1");
    }

    #[test]
    fn multi_zone_device_requires_zone_number() {
        let err = TwoZoneRegistry.resolve_device_zone("two", None).unwrap_err();
        assert!(matches!(err, IrrigOpsError::Validation(_)));

        let zone = TwoZoneRegistry.resolve_device_zone("two", Some(2)).unwrap();
        assert_eq!(zone.zone_number, 2);
    }

    #[test]
    fn unknown_zone_number_is_validation_error() {
        let err = TwoZoneRegistry
            .resolve_device_zone("two", Some(9))
            .unwrap_err();
        assert!(matches!(err, IrrigOpsError::Validation(_)));
    }

    #[test]
    fn unknown_token_is_not_found() {
        let err = TwoZoneRegistry
            .resolve_device_zone("nope", Some(1))
            .unwrap_err();
        assert!(matches!(err, IrrigOpsError::NotFound(_)));
    }
}
