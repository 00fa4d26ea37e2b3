use crate::config::RegistryConfig;
use crate::db::Database;
use crate::error::{IrrigOpsError, Result};
use crate::models::{
    DeviceZone, EventSource, FieldContext, IrrigationEvent, IrrigationMethod, NdviRange, Session,
    SessionState, VigorLevel, VriZone, WaterBalanceState, ZoneCursor,
};
use crate::ports::{DeviceRegistry, EventLog, SessionStore, VriZoneStore, WaterBalanceStore};
use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Row};
use tracing::{info, warn};

// Timestamps are stored fixed-width so text comparison matches time order.
fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(column: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

fn parse_method(s: &str) -> IrrigationMethod {
    IrrigationMethod::from_str(s).unwrap_or_else(|| {
        warn!(method = %s, "Unknown irrigation method in database, defaulting to Drip");
        IrrigationMethod::Drip
    })
}

// Registry

impl Database {
    /// Mirrors the configured fields, devices and zones into the registry
    /// tables. Entries no longer in the config are left in place.
    pub fn sync_registry(&self, registry: &RegistryConfig) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            for field in &registry.fields {
                let method = IrrigationMethod::from_str(&field.method).ok_or_else(|| {
                    IrrigOpsError::Config(format!(
                        "field {}: unknown irrigation method '{}'",
                        field.id, field.method
                    ))
                })?;
                tx.execute(
                    r#"
                    INSERT INTO fields
                        (field_id, name, area_acres, flow_rate_gpm, method, latitude, longitude)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    ON CONFLICT(field_id) DO UPDATE SET
                        name = excluded.name, area_acres = excluded.area_acres,
                        flow_rate_gpm = excluded.flow_rate_gpm, method = excluded.method,
                        latitude = excluded.latitude, longitude = excluded.longitude
                    "#,
                    params![
                        field.id,
                        field.name,
                        field.area_acres,
                        field.flow_rate_gpm,
                        format!("{:?}", method),
                        field.latitude,
                        field.longitude,
                    ],
                )?;

                for device in &field.devices {
                    tx.execute(
                        "INSERT OR REPLACE INTO devices (token, device_id) VALUES (?1, ?2)",
                        params![device.token, device.device_id],
                    )?;
                    for zone in &device.zones {
                        tx.execute(
                            r#"
                            INSERT OR REPLACE INTO device_zones
                                (zone_id, device_id, zone_number, field_id, flow_rate_gpm, method)
                            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                            "#,
                            params![
                                DeviceZone::zone_id_for(&device.device_id, zone.number),
                                device.device_id,
                                zone.number,
                                field.id,
                                zone.flow_rate_gpm.unwrap_or(field.flow_rate_gpm),
                                format!("{:?}", method),
                            ],
                        )?;
                    }
                }
            }
            tx.commit()?;
            info!(fields = registry.fields.len(), "Device registry synced");
            Ok(())
        })
    }

    pub fn list_fields(&self) -> Result<Vec<FieldContext>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM fields ORDER BY field_id")?;
            let fields = stmt
                .query_map([], row_to_field)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(fields)
        })
    }
}

impl DeviceRegistry for Database {
    fn zones_for_device(&self, device_token: &str) -> Result<Vec<DeviceZone>> {
        self.with_conn(|conn| {
            let device_id: Option<String> = conn
                .query_row(
                    "SELECT device_id FROM devices WHERE token = ?1",
                    [device_token],
                    |row| row.get(0),
                )
                .optional()?;
            let device_id =
                device_id.ok_or_else(|| IrrigOpsError::NotFound("unknown device token".into()))?;

            let mut stmt = conn.prepare(
                "SELECT * FROM device_zones WHERE device_id = ?1 ORDER BY zone_number",
            )?;
            let zones = stmt
                .query_map([device_id], row_to_device_zone)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(zones)
        })
    }

    fn field(&self, field_id: &str) -> Result<FieldContext> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT * FROM fields WHERE field_id = ?1",
                [field_id],
                row_to_field,
            )
            .optional()?
            .ok_or_else(|| IrrigOpsError::NotFound(format!("field {}", field_id)))
        })
    }
}

fn row_to_field(row: &Row) -> rusqlite::Result<FieldContext> {
    let method: String = row.get("method")?;
    Ok(FieldContext {
        field_id: row.get("field_id")?,
        name: row.get("name")?,
        area_acres: row.get("area_acres")?,
        flow_rate_gpm: row.get("flow_rate_gpm")?,
        method: parse_method(&method),
        latitude: row.get("latitude")?,
        longitude: row.get("longitude")?,
    })
}

fn row_to_device_zone(row: &Row) -> rusqlite::Result<DeviceZone> {
    let method: String = row.get("method")?;
    Ok(DeviceZone {
        device_id: row.get("device_id")?,
        zone_number: row.get("zone_number")?,
        zone_id: row.get("zone_id")?,
        field_id: row.get("field_id")?,
        flow_rate_gpm: row.get("flow_rate_gpm")?,
        method: parse_method(&method),
    })
}

// Sessions and cursors

impl SessionStore for Database {
    fn load_session(&self, zone_id: &str) -> Result<Option<Session>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT * FROM sessions WHERE zone_id = ?1",
                [zone_id],
                row_to_session,
            )
            .optional()
            .map_err(Into::into)
        })
    }

    fn save_session(&self, session: &Session) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT OR REPLACE INTO sessions
                    (zone_id, field_id, phase, consecutive_above, consecutive_below,
                     start_time, last_above_threshold_time, last_below_threshold_time,
                     accumulated_gallons, reading_count, last_reading_at, last_flow_gpm,
                     first_cumulative_gallons, last_cumulative_gallons, cumulative_complete,
                     updated_at, tail_gallons)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
                "#,
                params![
                    session.zone_id,
                    session.field_id,
                    session.phase().as_str(),
                    session.consecutive_above(),
                    session.consecutive_below(),
                    fmt_ts(session.start_time),
                    fmt_ts(session.last_above_threshold_time),
                    session.last_below_threshold_time.map(fmt_ts),
                    session.accumulated_gallons,
                    session.reading_count,
                    fmt_ts(session.last_reading_at),
                    session.last_flow_gpm,
                    session.first_cumulative_gallons,
                    session.last_cumulative_gallons,
                    session.cumulative_complete,
                    fmt_ts(Utc::now()),
                    session.tail_gallons,
                ],
            )?;
            Ok(())
        })
    }

    fn clear_session(&self, zone_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM sessions WHERE zone_id = ?1", [zone_id])?;
            Ok(())
        })
    }

    fn active_sessions(&self) -> Result<Vec<Session>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM sessions ORDER BY zone_id")?;
            let sessions = stmt
                .query_map([], row_to_session)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(sessions)
        })
    }

    fn load_cursor(&self, zone_id: &str) -> Result<Option<ZoneCursor>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT * FROM zone_cursors WHERE zone_id = ?1",
                [zone_id],
                |row| {
                    let last: String = row.get("last_reading_at")?;
                    Ok(ZoneCursor {
                        zone_id: row.get("zone_id")?,
                        last_reading_at: parse_ts(1, &last)?,
                        last_cumulative_gallons: row.get("last_cumulative_gallons")?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
        })
    }

    fn save_cursor(&self, cursor: &ZoneCursor) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT OR REPLACE INTO zone_cursors
                    (zone_id, last_reading_at, last_cumulative_gallons)
                VALUES (?1, ?2, ?3)
                "#,
                params![
                    cursor.zone_id,
                    fmt_ts(cursor.last_reading_at),
                    cursor.last_cumulative_gallons,
                ],
            )?;
            Ok(())
        })
    }
}

fn row_to_session(row: &Row) -> rusqlite::Result<Session> {
    let phase: String = row.get("phase")?;
    let state = SessionState::from_parts(
        &phase,
        row.get("consecutive_above")?,
        row.get("consecutive_below")?,
    )
    .ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            Type::Text,
            format!("unknown session phase '{}'", phase).into(),
        )
    })?;

    let start: String = row.get("start_time")?;
    let above: String = row.get("last_above_threshold_time")?;
    let below: Option<String> = row.get("last_below_threshold_time")?;
    let last: String = row.get("last_reading_at")?;

    Ok(Session {
        zone_id: row.get("zone_id")?,
        field_id: row.get("field_id")?,
        state,
        start_time: parse_ts(5, &start)?,
        last_above_threshold_time: parse_ts(6, &above)?,
        last_below_threshold_time: below.map(|s| parse_ts(7, &s)).transpose()?,
        accumulated_gallons: row.get("accumulated_gallons")?,
        tail_gallons: row.get("tail_gallons")?,
        reading_count: row.get("reading_count")?,
        last_reading_at: parse_ts(10, &last)?,
        last_flow_gpm: row.get("last_flow_gpm")?,
        first_cumulative_gallons: row.get("first_cumulative_gallons")?,
        last_cumulative_gallons: row.get("last_cumulative_gallons")?,
        cumulative_complete: row.get("cumulative_complete")?,
    })
}

// Irrigation events

impl EventLog for Database {
    fn append_event(&self, event: &IrrigationEvent) -> Result<()> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                r#"
                INSERT OR IGNORE INTO irrigation_events
                    (zone_id, field_id, start_time, end_time, total_gallons, avg_flow_gpm, source)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    event.zone_id,
                    event.field_id,
                    fmt_ts(event.start_time),
                    fmt_ts(event.end_time),
                    event.total_gallons,
                    event.avg_flow_gpm,
                    event.source.as_str(),
                ],
            )?;
            if inserted == 0 {
                tracing::debug!(zone_id = %event.zone_id, "Event already recorded");
            }
            Ok(())
        })
    }

    fn events_for_field_on(&self, field_id: &str, date: NaiveDate) -> Result<Vec<IrrigationEvent>> {
        let day_start = date.and_time(chrono::NaiveTime::MIN).and_utc();
        let day_end = day_start + Duration::days(1);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT * FROM irrigation_events
                WHERE field_id = ?1 AND end_time >= ?2 AND end_time < ?3
                ORDER BY end_time
                "#,
            )?;
            let events = stmt
                .query_map(
                    params![field_id, fmt_ts(day_start), fmt_ts(day_end)],
                    row_to_event,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(events)
        })
    }
}

impl Database {
    pub fn events_for_zone(&self, zone_id: &str) -> Result<Vec<IrrigationEvent>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT * FROM irrigation_events WHERE zone_id = ?1 ORDER BY start_time")?;
            let events = stmt
                .query_map([zone_id], row_to_event)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(events)
        })
    }
}

fn row_to_event(row: &Row) -> rusqlite::Result<IrrigationEvent> {
    let start: String = row.get("start_time")?;
    let end: String = row.get("end_time")?;
    Ok(IrrigationEvent {
        zone_id: row.get("zone_id")?,
        field_id: row.get("field_id")?,
        start_time: parse_ts(3, &start)?,
        end_time: parse_ts(4, &end)?,
        total_gallons: row.get("total_gallons")?,
        avg_flow_gpm: row.get("avg_flow_gpm")?,
        source: EventSource::Sensor,
    })
}

// Water balance

impl WaterBalanceStore for Database {
    fn load_water_balance(&self, field_id: &str) -> Result<Option<WaterBalanceState>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT * FROM water_balance WHERE field_id = ?1",
                [field_id],
                |row| {
                    let last: Option<String> = row.get("last_updated")?;
                    Ok(WaterBalanceState {
                        field_id: row.get("field_id")?,
                        layer_surface_pct: row.get("layer_surface_pct")?,
                        layer_mid_pct: row.get("layer_mid_pct")?,
                        layer_deep_pct: row.get("layer_deep_pct")?,
                        cumulative_deficit_mm: row.get("cumulative_deficit_mm")?,
                        last_updated: last.and_then(|s| {
                            NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                                .map_err(|_| {
                                    warn!(last_updated = %s, "Unparseable water balance date, ignoring");
                                })
                                .ok()
                        }),
                    })
                },
            )
            .optional()
            .map_err(Into::into)
        })
    }

    fn save_water_balance(&self, state: &WaterBalanceState) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                r#"
                INSERT OR REPLACE INTO water_balance
                    (field_id, layer_surface_pct, layer_mid_pct, layer_deep_pct,
                     cumulative_deficit_mm, last_updated)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    state.field_id,
                    state.layer_surface_pct,
                    state.layer_mid_pct,
                    state.layer_deep_pct,
                    state.cumulative_deficit_mm,
                    state.last_updated.map(|d| d.format("%Y-%m-%d").to_string()),
                ],
            )?;
            Ok(())
        })
    }
}

// VRI zones

impl VriZoneStore for Database {
    fn save_zones(&self, field_id: &str, zones: &[VriZone]) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM vri_zones WHERE field_id = ?1", [field_id])?;
            for (position, zone) in zones.iter().enumerate() {
                tx.execute(
                    r#"
                    INSERT INTO vri_zones
                        (field_id, zone_name, position, ndvi_min, ndvi_max, vigor_level,
                         irrigation_multiplier_pct, area_acres)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    "#,
                    params![
                        field_id,
                        zone.zone_name,
                        position as i64,
                        zone.ndvi_range.min,
                        zone.ndvi_range.max,
                        zone.vigor_level.as_str(),
                        zone.irrigation_multiplier_pct,
                        zone.area_acres,
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    fn load_zones(&self, field_id: &str) -> Result<Vec<VriZone>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT * FROM vri_zones WHERE field_id = ?1 ORDER BY position")?;
            let zones = stmt
                .query_map([field_id], row_to_vri_zone)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(zones)
        })
    }

    fn update_multiplier(&self, field_id: &str, zone_name: &str, multiplier_pct: f64) -> Result<()> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                r#"
                UPDATE vri_zones SET irrigation_multiplier_pct = ?1
                WHERE field_id = ?2 AND zone_name = ?3
                "#,
                params![multiplier_pct, field_id, zone_name],
            )?;
            if updated == 0 {
                return Err(IrrigOpsError::NotFound(format!(
                    "VRI zone '{}' on field {}",
                    zone_name, field_id
                )));
            }
            Ok(())
        })
    }
}

fn row_to_vri_zone(row: &Row) -> rusqlite::Result<VriZone> {
    let level: String = row.get("vigor_level")?;
    let vigor_level = VigorLevel::from_str(&level).unwrap_or_else(|| {
        warn!(vigor_level = %level, "Unknown vigor level in database, defaulting to Medium");
        VigorLevel::Medium
    });
    Ok(VriZone {
        zone_name: row.get("zone_name")?,
        ndvi_range: NdviRange {
            min: row.get("ndvi_min")?,
            max: row.get("ndvi_max")?,
        },
        vigor_level,
        irrigation_multiplier_pct: row.get("irrigation_multiplier_pct")?,
        area_acres: row.get("area_acres")?,
    })
}

trait OptionalExt<T> {
    fn optional(self) -> rusqlite::Result<Option<T>>;
}

impl<T> OptionalExt<T> for rusqlite::Result<T> {
    fn optional(self) -> rusqlite::Result<Option<T>> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
