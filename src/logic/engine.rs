use super::aggregator::{Discard, SessionAggregator};
use super::calculations::irrigation_depth_mm;
use super::detector::{SessionDetector, Step, Transition};
use super::normalizer::normalize;
use super::recommendation::{RecommendationEngine, RecommendationInputs};
use super::vri::build_zones;
use super::water_balance::WaterBalanceCalculator;
use crate::config::Config;
use crate::error::{IrrigOpsError, Result};
use crate::models::{
    Alert, AlertKind, BandConfig, DailyInputs, IrrigationEvent, IrrigationRecommendation,
    NdviRaster, RawReading, Session, Urgency, VriZone, WaterBalanceReport, WaterBalanceState,
    ZoneCursor, ZonePhase,
};
use crate::ports::{ClimateDay, ClimateFeed, DeviceRegistry, Notifier, Store};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    OutOfOrder,
    CounterRegression,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestOutcome {
    Applied {
        zone_id: String,
        transition: Transition,
        phase: ZonePhase,
        event: Option<IrrigationEvent>,
    },
    Dropped {
        zone_id: String,
        reason: DropReason,
    },
}

impl IngestOutcome {
    pub fn event(&self) -> Option<&IrrigationEvent> {
        match self {
            IngestOutcome::Applied { event, .. } => event.as_ref(),
            IngestOutcome::Dropped { .. } => None,
        }
    }

    pub fn transition(&self) -> Option<Transition> {
        match self {
            IngestOutcome::Applied { transition, .. } => Some(*transition),
            IngestOutcome::Dropped { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum SessionWrite {
    Save(Session),
    Clear,
    Keep,
}

/// Storage side effects of one decision, replayable as a unit.
#[derive(Debug, Clone, PartialEq)]
struct PersistPlan {
    zone_id: String,
    event: Option<IrrigationEvent>,
    session: SessionWrite,
    cursor: Option<ZoneCursor>,
}

#[derive(Debug, Clone, PartialEq)]
enum ReplayKey {
    Reading(DateTime<Utc>),
    Stop,
}

#[derive(Debug, Clone)]
struct PendingWrite {
    key: ReplayKey,
    plan: PersistPlan,
    outcome: Option<IngestOutcome>,
}

#[derive(Debug, Default)]
struct ZoneSlot {
    loaded: bool,
    session: Option<Session>,
    cursor: Option<ZoneCursor>,
    pending: Option<PendingWrite>,
    dropped: u64,
}

/// One async mutex per key, created on first use. The outer map lock is only
/// held long enough to find or insert the entry.
struct KeyedLocks<T> {
    slots: std::sync::Mutex<HashMap<String, Arc<Mutex<T>>>>,
}

impl<T: Default> KeyedLocks<T> {
    fn new() -> Self {
        Self {
            slots: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, key: &str) -> Arc<Mutex<T>> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(slots.entry(key.to_string()).or_default())
    }

    fn keys(&self) -> Vec<String> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.keys().cloned().collect()
    }
}

struct Inner {
    config: Config,
    detector: SessionDetector,
    aggregator: SessionAggregator,
    balance: WaterBalanceCalculator,
    recommender: RecommendationEngine,
    registry: Arc<dyn DeviceRegistry>,
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    zones: KeyedLocks<ZoneSlot>,
    fields: KeyedLocks<()>,
}

/// Flow monitoring and water-balance engine.
///
/// Transitions for a zone are serialized behind that zone's lock; unrelated
/// zones and fields proceed concurrently. Cloning is cheap and shares state.
#[derive(Clone)]
pub struct FlowEngine {
    inner: Arc<Inner>,
}

impl FlowEngine {
    pub fn new(
        config: Config,
        registry: Arc<dyn DeviceRegistry>,
        store: Arc<dyn Store>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let inner = Inner {
            detector: SessionDetector::new(config.detector),
            aggregator: SessionAggregator::new(config.noise_filter),
            balance: WaterBalanceCalculator::new(config.water_balance.clone()),
            recommender: RecommendationEngine::new(config.recommendation),
            config,
            registry,
            store,
            notifier,
            zones: KeyedLocks::new(),
            fields: KeyedLocks::new(),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Webhook entry point.
    ///
    /// Duplicate, out-of-order and counter-regressed readings come back as
    /// `IngestOutcome::Dropped` and are counted per zone. A `Persistence`
    /// error means the decision was made and kept; resending the same reading
    /// (or calling `retry_pending`) replays the writes without re-deciding.
    pub async fn ingest_reading(
        &self,
        device_token: &str,
        raw: &RawReading,
    ) -> Result<IngestOutcome> {
        let (reading, zone) = normalize(
            self.inner.registry.as_ref(),
            device_token,
            raw,
            Utc::now(),
        )?;

        let slot = self.inner.zones.slot(&reading.zone_id);
        let mut slot = slot.lock().await;
        self.ensure_loaded(&mut slot, &reading.zone_id)?;

        if let Some(pending) = slot.pending.clone() {
            self.flush(&mut slot)?;
            if pending.key == ReplayKey::Reading(reading.timestamp) {
                if let Some(outcome) = pending.outcome {
                    debug!(zone_id = %reading.zone_id, "Replayed pending writes for resent reading");
                    return Ok(outcome);
                }
            }
        }

        let step = match self.inner.detector.observe(
            slot.session.as_ref(),
            slot.cursor.as_ref(),
            &reading,
            &zone.field_id,
        ) {
            Ok(step) => step,
            Err(e) if e.is_drop() => {
                slot.dropped += 1;
                return Ok(self.dropped(&reading.zone_id, e, slot.dropped));
            }
            Err(e) => return Err(e),
        };

        let Step {
            transition,
            session,
            finished,
            cursor,
        } = step;

        let event = finished.and_then(|done| self.finalize(&done));

        let session_write = match (&session, slot.session.is_some()) {
            (Some(s), _) => SessionWrite::Save(s.clone()),
            (None, true) => SessionWrite::Clear,
            (None, false) => SessionWrite::Keep,
        };

        let phase = session.as_ref().map(|s| s.phase()).unwrap_or(ZonePhase::Idle);
        match transition {
            Transition::Opened => info!(zone_id = %reading.zone_id, "Irrigation session opened"),
            Transition::Reset => debug!(zone_id = %reading.zone_id, "False start discarded"),
            _ => debug!(zone_id = %reading.zone_id, %transition, %phase, "Reading applied"),
        }

        slot.session = session;
        slot.cursor = Some(cursor.clone());

        let plan = PersistPlan {
            zone_id: reading.zone_id.clone(),
            event: event.clone(),
            session: session_write,
            cursor: Some(cursor),
        };
        let outcome = IngestOutcome::Applied {
            zone_id: reading.zone_id.clone(),
            transition,
            phase,
            event,
        };

        self.persist(
            &mut slot,
            PendingWrite {
                key: ReplayKey::Reading(reading.timestamp),
                plan,
                outcome: Some(outcome.clone()),
            },
        )?;

        Ok(outcome)
    }

    /// Operator stop. Finalizes whatever the session collected; a no-op on
    /// an idle zone.
    pub async fn stop_session(&self, zone_id: &str) -> Result<Option<IrrigationEvent>> {
        let slot = self.inner.zones.slot(zone_id);
        let mut slot = slot.lock().await;
        self.ensure_loaded(&mut slot, zone_id)?;

        if let Some(pending) = slot.pending.clone() {
            self.flush(&mut slot)?;
            if pending.key == ReplayKey::Stop {
                return Ok(pending.plan.event);
            }
        }

        let Some(session) = slot.session.take() else {
            debug!(zone_id, "Stop requested on idle zone");
            return Ok(None);
        };

        let event = if session.phase().is_open() {
            self.finalize(&session)
        } else {
            debug!(zone_id, "Stop cleared a rising session");
            None
        };
        info!(zone_id, emitted = event.is_some(), "Session stopped by operator");

        self.persist(
            &mut slot,
            PendingWrite {
                key: ReplayKey::Stop,
                plan: PersistPlan {
                    zone_id: zone_id.to_string(),
                    event: event.clone(),
                    session: SessionWrite::Clear,
                    cursor: None,
                },
                outcome: None,
            },
        )?;

        Ok(event)
    }

    /// Flushes writes left behind by an earlier storage failure.
    /// Returns whether anything was pending.
    pub async fn retry_pending(&self, zone_id: &str) -> Result<bool> {
        let slot = self.inner.zones.slot(zone_id);
        let mut slot = slot.lock().await;
        if slot.pending.is_none() {
            return Ok(false);
        }
        self.flush(&mut slot)?;
        Ok(true)
    }

    pub async fn zone_phase(&self, zone_id: &str) -> Result<ZonePhase> {
        Ok(self
            .session(zone_id)
            .await?
            .map(|s| s.phase())
            .unwrap_or(ZonePhase::Idle))
    }

    pub async fn session(&self, zone_id: &str) -> Result<Option<Session>> {
        let slot = self.inner.zones.slot(zone_id);
        let mut slot = slot.lock().await;
        self.ensure_loaded(&mut slot, zone_id)?;
        Ok(slot.session.clone())
    }

    /// Readings dropped for this zone since the engine started.
    pub async fn dropped_readings(&self, zone_id: &str) -> u64 {
        let slot = self.inner.zones.slot(zone_id);
        let slot = slot.lock().await;
        slot.dropped
    }

    /// Raises `DeviceOffline` for open sessions with no recent readings.
    /// Sessions stay open; only a low reading or a stop ends them.
    pub async fn sweep_stale_sessions(&self, now: DateTime<Utc>) -> Result<Vec<Alert>> {
        let mut zone_ids: Vec<String> = self
            .inner
            .store
            .active_sessions()
            .map_err(persistence)?
            .into_iter()
            .map(|s| s.zone_id)
            .collect();
        zone_ids.extend(self.inner.zones.keys());
        zone_ids.sort();
        zone_ids.dedup();

        let stale_after = self.inner.config.detector.stale_after_minutes as f64;
        let mut alerts = Vec::new();

        for zone_id in zone_ids {
            let Some(session) = self.session(&zone_id).await? else {
                continue;
            };
            if !session.phase().is_open() {
                continue;
            }
            let silent_for = session.minutes_since_last_reading(now);
            if silent_for >= stale_after {
                let alert = Alert::new(
                    AlertKind::DeviceOffline,
                    &zone_id,
                    format!(
                        "Zone {} has an open session but no reading for {:.0} minutes. \
                         Stop the session manually if the valve is closed.",
                        zone_id, silent_for
                    ),
                );
                self.inner.notifier.notify(&alert);
                alerts.push(alert);
            }
        }

        Ok(alerts)
    }

    /// Applies one day of ET, rainfall and recorded irrigation to a field.
    pub async fn recompute_field<C: ClimateFeed>(
        &self,
        feed: &C,
        field_id: &str,
        date: NaiveDate,
    ) -> Result<WaterBalanceReport> {
        let lock = self.inner.fields.slot(field_id);
        let _guard = lock.lock().await;

        let field = self.inner.registry.field(field_id)?;
        let state = self.load_balance(field_id)?;

        if state.last_updated.is_some_and(|d| d >= date) {
            debug!(field_id, %date, "Water balance already includes this day");
            let inputs = DailyInputs {
                date,
                reference_et_mm: 0.0,
                irrigation_mm: 0.0,
                rainfall_mm: 0.0,
            };
            return self.inner.balance.apply_day(&state, &inputs);
        }

        let ClimateDay {
            reference_et_mm,
            rainfall_mm,
        } = feed.climate_day(&field, date).await?;
        let events = self
            .inner
            .store
            .events_for_field_on(field_id, date)
            .map_err(persistence)?;
        let irrigation_mm = irrigation_depth_mm(&events, field.area_acres);

        let report = self.inner.balance.apply_day(
            &state,
            &DailyInputs {
                date,
                reference_et_mm,
                irrigation_mm,
                rainfall_mm,
            },
        )?;

        self.inner
            .store
            .save_water_balance(&report.state)
            .map_err(persistence)?;

        info!(
            field_id,
            %date,
            deficit_mm = report.state.cumulative_deficit_mm,
            surplus_mm = report.surplus_mm,
            "Field water balance recomputed"
        );

        Ok(report)
    }

    /// Recomputes several fields concurrently. Results come back sorted by
    /// field id; a failing field does not stop the others.
    pub async fn recompute_fields<C>(
        &self,
        feed: C,
        field_ids: Vec<String>,
        date: NaiveDate,
    ) -> Vec<(String, Result<WaterBalanceReport>)>
    where
        C: ClimateFeed + Clone + 'static,
    {
        let mut set = tokio::task::JoinSet::new();
        for field_id in field_ids {
            let engine = self.clone();
            let feed = feed.clone();
            set.spawn(async move {
                let result = engine.recompute_field(&feed, &field_id, date).await;
                (field_id, result)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(entry) => results.push(entry),
                Err(e) => tracing::error!("Water balance task failed: {}", e),
            }
        }
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }

    pub async fn get_recommendation<C: ClimateFeed>(
        &self,
        feed: &C,
        field_id: &str,
        today: NaiveDate,
    ) -> Result<IrrigationRecommendation> {
        let field = self.inner.registry.field(field_id)?;
        let state = self.load_balance(field_id)?;
        let days = self.inner.config.recommendation.forecast_days;

        let forecast_crop_et_mm = match feed.forecast_reference_et(&field, today, days).await {
            Ok(et0) => self.inner.balance.forecast_crop_et(today, &et0)?,
            Err(e) => {
                warn!(field_id, "Forecast ET unavailable, using current deficit only: {}", e);
                0.0
            }
        };

        let zones = self.inner.store.load_zones(field_id).map_err(persistence)?;

        let recommendation = self.inner.recommender.recommend(&RecommendationInputs {
            field: &field,
            deficit_mm: state.cumulative_deficit_mm,
            forecast_crop_et_mm,
            zones: &zones,
        });

        if recommendation.urgency == Urgency::Critical {
            let alert = Alert::new(
                AlertKind::CriticalDeficit,
                field_id,
                format!(
                    "{} is {:.1}mm short of field capacity. {}",
                    field.name, recommendation.deficit_mm, recommendation.summary
                ),
            );
            self.inner.notifier.notify(&alert);
        }

        Ok(recommendation)
    }

    /// Builds and stores VRI zones for a field, replacing any previous set.
    pub async fn build_vri_zones(
        &self,
        field_id: &str,
        raster: &NdviRaster,
        band_config: &BandConfig,
    ) -> Result<Vec<VriZone>> {
        self.inner.registry.field(field_id)?;
        let zones = build_zones(raster, band_config)?;
        self.inner
            .store
            .save_zones(field_id, &zones)
            .map_err(persistence)?;
        info!(field_id, zones = zones.len(), "VRI zones generated");
        Ok(zones)
    }

    pub async fn update_vri_multiplier(
        &self,
        field_id: &str,
        zone_name: &str,
        multiplier_pct: f64,
    ) -> Result<()> {
        if !multiplier_pct.is_finite() || multiplier_pct <= 0.0 {
            return Err(IrrigOpsError::Validation(format!(
                "multiplier must be a positive percentage, got {}",
                multiplier_pct
            )));
        }
        let zones = self.inner.store.load_zones(field_id).map_err(persistence)?;
        if !zones.iter().any(|z| z.zone_name == zone_name) {
            return Err(IrrigOpsError::NotFound(format!(
                "VRI zone '{}' on field {}",
                zone_name, field_id
            )));
        }
        self.inner
            .store
            .update_multiplier(field_id, zone_name, multiplier_pct)
            .map_err(persistence)
    }

    fn ensure_loaded(&self, slot: &mut ZoneSlot, zone_id: &str) -> Result<()> {
        if slot.loaded {
            return Ok(());
        }
        slot.session = self
            .inner
            .store
            .load_session(zone_id)
            .map_err(persistence)?;
        slot.cursor = self.inner.store.load_cursor(zone_id).map_err(persistence)?;
        slot.loaded = true;
        Ok(())
    }

    fn load_balance(&self, field_id: &str) -> Result<WaterBalanceState> {
        Ok(self
            .inner
            .store
            .load_water_balance(field_id)
            .map_err(persistence)?
            .unwrap_or_else(|| WaterBalanceState::at_field_capacity(field_id)))
    }

    fn finalize(&self, session: &Session) -> Option<IrrigationEvent> {
        match self.inner.aggregator.finalize(session) {
            Ok(event) => {
                info!(
                    zone_id = %event.zone_id,
                    gallons = event.total_gallons,
                    minutes = event.duration_minutes(),
                    "Irrigation event recorded"
                );
                Some(event)
            }
            Err(Discard::TooShort { minutes }) => {
                debug!(zone_id = %session.zone_id, minutes, "Session too short, discarded");
                None
            }
            Err(Discard::TooSmall { gallons }) => {
                debug!(zone_id = %session.zone_id, gallons, "Session volume too small, discarded");
                None
            }
        }
    }

    fn dropped(&self, zone_id: &str, err: IrrigOpsError, count: u64) -> IngestOutcome {
        let reason = match &err {
            IrrigOpsError::CounterRegression { .. } => {
                let alert = Alert::new(
                    AlertKind::CounterRegression,
                    zone_id,
                    format!("{}. Check the meter for a reset or rollover.", err),
                );
                self.inner.notifier.notify(&alert);
                DropReason::CounterRegression
            }
            _ => DropReason::OutOfOrder,
        };
        debug!(zone_id, dropped = count, "Reading dropped: {}", err);
        IngestOutcome::Dropped {
            zone_id: zone_id.to_string(),
            reason,
        }
    }

    fn persist(&self, slot: &mut ZoneSlot, pending: PendingWrite) -> Result<()> {
        slot.pending = Some(pending);
        self.flush(slot)
    }

    fn flush(&self, slot: &mut ZoneSlot) -> Result<()> {
        let Some(pending) = slot.pending.as_ref() else {
            return Ok(());
        };
        let plan = &pending.plan;
        let store = &self.inner.store;

        let result = (|| -> Result<()> {
            if let Some(event) = &plan.event {
                store.append_event(event)?;
            }
            match &plan.session {
                SessionWrite::Save(session) => store.save_session(session)?,
                SessionWrite::Clear => store.clear_session(&plan.zone_id)?,
                SessionWrite::Keep => {}
            }
            if let Some(cursor) = &plan.cursor {
                store.save_cursor(cursor)?;
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                slot.pending = None;
                Ok(())
            }
            Err(e) => {
                warn!(zone_id = %plan.zone_id, "Persisting zone state failed, will replay: {}", e);
                Err(persistence(e))
            }
        }
    }
}

fn persistence(err: IrrigOpsError) -> IrrigOpsError {
    match err {
        IrrigOpsError::Persistence(_) => err,
        other => IrrigOpsError::Persistence(other.to_string()),
    }
}
