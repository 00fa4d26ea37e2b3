#![allow(dead_code)]

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use irrigops::config::{Config, DeviceEntry, FieldEntry, RegistryConfig, ZoneEntry};
use irrigops::db::Database;
use irrigops::error::{IrrigOpsError, Result};
use irrigops::logic::{FlowEngine, IngestOutcome};
use irrigops::models::{
    Alert, FieldContext, IrrigationEvent, RawReading, Session, VriZone, WaterBalanceState,
    ZoneCursor,
};
use irrigops::ports::{
    ClimateDay, ClimateFeed, EventLog, Notifier, SessionStore, VriZoneStore, WaterBalanceStore,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const TOKEN_A: &str = "tok-block-a";
pub const TOKEN_B: &str = "tok-block-b";
pub const ZONE_A1: &str = "meter-a:1";
pub const ZONE_A2: &str = "meter-a:2";
pub const ZONE_B1: &str = "meter-b:1";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 7, 1, 5, 0, 0).unwrap()
}

pub fn minutes(m: i64) -> DateTime<Utc> {
    t0() + Duration::minutes(m)
}

pub fn july(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 7, day).unwrap()
}

pub fn registry() -> RegistryConfig {
    RegistryConfig {
        fields: vec![
            FieldEntry {
                id: "block-a".into(),
                name: "Block A".into(),
                area_acres: 10.0,
                flow_rate_gpm: 200.0,
                method: "drip".into(),
                latitude: Some(38.5),
                longitude: Some(-122.4),
                devices: vec![DeviceEntry {
                    device_id: "meter-a".into(),
                    token: TOKEN_A.into(),
                    zones: vec![
                        ZoneEntry {
                            number: 1,
                            flow_rate_gpm: None,
                        },
                        ZoneEntry {
                            number: 2,
                            flow_rate_gpm: Some(150.0),
                        },
                    ],
                }],
            },
            FieldEntry {
                id: "block-b".into(),
                name: "Block B".into(),
                area_acres: 4.0,
                flow_rate_gpm: 80.0,
                method: "micro-sprinkler".into(),
                latitude: Some(38.6),
                longitude: Some(-122.5),
                devices: vec![DeviceEntry {
                    device_id: "meter-b".into(),
                    token: TOKEN_B.into(),
                    zones: vec![ZoneEntry {
                        number: 1,
                        flow_rate_gpm: None,
                    }],
                }],
            },
        ],
    }
}

/// Collects alerts for assertions.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    alerts: Arc<Mutex<Vec<Alert>>>,
}

impl RecordingNotifier {
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, alert: &Alert) {
        self.alerts.lock().unwrap().push(alert.clone());
    }
}

/// Database wrapper whose writes can be switched off.
#[derive(Clone)]
pub struct FlakyStore {
    pub db: Database,
    pub failing: Arc<AtomicBool>,
}

impl FlakyStore {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn fail(&self, on: bool) {
        self.failing.store(on, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(IrrigOpsError::Persistence("disk unavailable".into()));
        }
        Ok(())
    }
}

impl SessionStore for FlakyStore {
    fn load_session(&self, zone_id: &str) -> Result<Option<Session>> {
        self.db.load_session(zone_id)
    }
    fn save_session(&self, session: &Session) -> Result<()> {
        self.check()?;
        self.db.save_session(session)
    }
    fn clear_session(&self, zone_id: &str) -> Result<()> {
        self.check()?;
        self.db.clear_session(zone_id)
    }
    fn active_sessions(&self) -> Result<Vec<Session>> {
        self.db.active_sessions()
    }
    fn load_cursor(&self, zone_id: &str) -> Result<Option<ZoneCursor>> {
        self.db.load_cursor(zone_id)
    }
    fn save_cursor(&self, cursor: &ZoneCursor) -> Result<()> {
        self.check()?;
        self.db.save_cursor(cursor)
    }
}

impl EventLog for FlakyStore {
    fn append_event(&self, event: &IrrigationEvent) -> Result<()> {
        self.check()?;
        self.db.append_event(event)
    }
    fn events_for_field_on(&self, field_id: &str, date: NaiveDate) -> Result<Vec<IrrigationEvent>> {
        self.db.events_for_field_on(field_id, date)
    }
}

impl WaterBalanceStore for FlakyStore {
    fn load_water_balance(&self, field_id: &str) -> Result<Option<WaterBalanceState>> {
        self.db.load_water_balance(field_id)
    }
    fn save_water_balance(&self, state: &WaterBalanceState) -> Result<()> {
        self.check()?;
        self.db.save_water_balance(state)
    }
}

impl VriZoneStore for FlakyStore {
    fn save_zones(&self, field_id: &str, zones: &[VriZone]) -> Result<()> {
        self.check()?;
        self.db.save_zones(field_id, zones)
    }
    fn load_zones(&self, field_id: &str) -> Result<Vec<VriZone>> {
        self.db.load_zones(field_id)
    }
    fn update_multiplier(&self, field_id: &str, zone_name: &str, multiplier_pct: f64) -> Result<()> {
        self.check()?;
        self.db.update_multiplier(field_id, zone_name, multiplier_pct)
    }
}

/// Climate feed with fixed daily values.
#[derive(Clone)]
pub struct FakeClimate {
    pub et0_mm: f64,
    pub rain_mm: f64,
    /// `None` makes the forecast unavailable.
    pub forecast: Option<Vec<f64>>,
    pub calls: Arc<AtomicUsize>,
}

impl FakeClimate {
    pub fn new(et0_mm: f64, rain_mm: f64) -> Self {
        Self {
            et0_mm,
            rain_mm,
            forecast: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_forecast(mut self, forecast: Vec<f64>) -> Self {
        self.forecast = Some(forecast);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ClimateFeed for FakeClimate {
    async fn reference_et(&self, _field: &FieldContext, _date: NaiveDate) -> Result<f64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.et0_mm)
    }

    async fn rainfall(&self, _field: &FieldContext, _date: NaiveDate) -> Result<f64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.rain_mm)
    }

    async fn forecast_reference_et(
        &self,
        _field: &FieldContext,
        _start: NaiveDate,
        days: u32,
    ) -> Result<Vec<f64>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.forecast {
            Some(values) => Ok(values.iter().take(days as usize).copied().collect()),
            None => Err(IrrigOpsError::DataSourceUnavailable("forecast offline".into())),
        }
    }

    async fn climate_day(&self, _field: &FieldContext, _date: NaiveDate) -> Result<ClimateDay> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ClimateDay {
            reference_et_mm: self.et0_mm,
            rainfall_mm: self.rain_mm,
        })
    }
}

/// Feed without a combined lookup, for the trait's default path.
#[derive(Clone)]
pub struct SplitClimate(pub FakeClimate);

impl ClimateFeed for SplitClimate {
    async fn reference_et(&self, field: &FieldContext, date: NaiveDate) -> Result<f64> {
        self.0.reference_et(field, date).await
    }

    async fn rainfall(&self, field: &FieldContext, date: NaiveDate) -> Result<f64> {
        self.0.rainfall(field, date).await
    }

    async fn forecast_reference_et(
        &self,
        field: &FieldContext,
        start: NaiveDate,
        days: u32,
    ) -> Result<Vec<f64>> {
        self.0.forecast_reference_et(field, start, days).await
    }
}

pub struct Harness {
    pub db: Database,
    pub store: FlakyStore,
    pub engine: FlowEngine,
    pub notifier: RecordingNotifier,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(mut config: Config) -> Self {
        config.registry = registry();
        let db = Database::open_in_memory().unwrap();
        db.sync_registry(&config.registry).unwrap();
        let store = FlakyStore::new(db.clone());
        let notifier = RecordingNotifier::default();
        let engine = FlowEngine::new(
            config,
            Arc::new(db.clone()),
            Arc::new(store.clone()),
            Arc::new(notifier.clone()),
        );
        Self {
            db,
            store,
            engine,
            notifier,
        }
    }

    /// A second engine over the same database, as after a restart.
    pub fn restarted(&self) -> FlowEngine {
        FlowEngine::new(
            Config {
                registry: registry(),
                ..Config::default()
            },
            Arc::new(self.db.clone()),
            Arc::new(self.store.clone()),
            Arc::new(self.notifier.clone()),
        )
    }

    pub async fn send(&self, zone: u32, at: DateTime<Utc>, flow: f64) -> Result<IngestOutcome> {
        self.engine
            .ingest_reading(TOKEN_A, &RawReading::flow(flow).zone(zone).at(at))
            .await
    }

    /// Feeds `(minute, flow)` pairs to zone 1 and returns emitted events.
    pub async fn run(&self, readings: &[(i64, f64)]) -> Vec<IrrigationEvent> {
        let mut events = Vec::new();
        for (m, flow) in readings {
            let outcome = self.send(1, minutes(*m), *flow).await.unwrap();
            if let Some(e) = outcome.event() {
                events.push(e.clone());
            }
        }
        events
    }
}

/// `count` readings of `flow`, two minutes apart from `start`.
pub fn series(start: i64, count: i64, flow: f64) -> Vec<(i64, f64)> {
    (0..count).map(|i| (start + 2 * i, flow)).collect()
}
