use crate::db::Database;
use crate::error::Result;

const MIGRATIONS: &[&str] = &[
    // Migration 1: registry and flow monitoring
    r#"
    CREATE TABLE IF NOT EXISTS fields (
        field_id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        area_acres REAL NOT NULL,
        flow_rate_gpm REAL NOT NULL,
        method TEXT NOT NULL,
        latitude REAL,
        longitude REAL
    );

    CREATE TABLE IF NOT EXISTS devices (
        token TEXT PRIMARY KEY,
        device_id TEXT NOT NULL UNIQUE
    );

    CREATE TABLE IF NOT EXISTS device_zones (
        zone_id TEXT PRIMARY KEY,
        device_id TEXT NOT NULL,
        zone_number INTEGER NOT NULL,
        field_id TEXT NOT NULL REFERENCES fields(field_id) ON DELETE CASCADE,
        flow_rate_gpm REAL NOT NULL,
        method TEXT NOT NULL,
        UNIQUE(device_id, zone_number)
    );

    CREATE TABLE IF NOT EXISTS sessions (
        zone_id TEXT PRIMARY KEY,
        field_id TEXT NOT NULL,
        phase TEXT NOT NULL,
        consecutive_above INTEGER NOT NULL DEFAULT 0,
        consecutive_below INTEGER NOT NULL DEFAULT 0,
        start_time TEXT NOT NULL,
        last_above_threshold_time TEXT NOT NULL,
        last_below_threshold_time TEXT,
        accumulated_gallons REAL NOT NULL,
        reading_count INTEGER NOT NULL,
        last_reading_at TEXT NOT NULL,
        last_flow_gpm REAL NOT NULL,
        first_cumulative_gallons REAL,
        last_cumulative_gallons REAL,
        cumulative_complete INTEGER NOT NULL,
        updated_at TEXT NOT NULL DEFAULT (datetime('now'))
    );

    CREATE TABLE IF NOT EXISTS zone_cursors (
        zone_id TEXT PRIMARY KEY,
        last_reading_at TEXT NOT NULL,
        last_cumulative_gallons REAL
    );

    CREATE TABLE IF NOT EXISTS irrigation_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        zone_id TEXT NOT NULL,
        field_id TEXT NOT NULL,
        start_time TEXT NOT NULL,
        end_time TEXT NOT NULL,
        total_gallons REAL NOT NULL,
        avg_flow_gpm REAL NOT NULL,
        source TEXT NOT NULL,
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        UNIQUE(zone_id, start_time)
    );

    CREATE TABLE IF NOT EXISTS schema_migrations (
        version INTEGER PRIMARY KEY,
        applied_at TEXT NOT NULL DEFAULT (datetime('now'))
    );
    "#,
    // Migration 2: water balance and VRI zones
    r#"
    CREATE TABLE IF NOT EXISTS water_balance (
        field_id TEXT PRIMARY KEY,
        layer_surface_pct REAL NOT NULL,
        layer_mid_pct REAL NOT NULL,
        layer_deep_pct REAL NOT NULL,
        cumulative_deficit_mm REAL NOT NULL,
        last_updated TEXT
    );

    CREATE TABLE IF NOT EXISTS vri_zones (
        field_id TEXT NOT NULL,
        zone_name TEXT NOT NULL,
        position INTEGER NOT NULL,
        ndvi_min REAL NOT NULL,
        ndvi_max REAL NOT NULL,
        vigor_level TEXT NOT NULL,
        irrigation_multiplier_pct REAL NOT NULL,
        area_acres REAL NOT NULL,
        PRIMARY KEY (field_id, zone_name)
    );
    "#,
    // Migration 3: indexes
    r#"
    CREATE INDEX IF NOT EXISTS idx_irrigation_events_field_start
        ON irrigation_events(field_id, start_time);
    CREATE INDEX IF NOT EXISTS idx_device_zones_device
        ON device_zones(device_id);
    "#,
    // Migration 4: falling-tail volume, events looked up by end time
    r#"
    ALTER TABLE sessions ADD COLUMN tail_gallons REAL NOT NULL DEFAULT 0;

    DROP INDEX IF EXISTS idx_irrigation_events_field_start;
    CREATE INDEX IF NOT EXISTS idx_irrigation_events_field_end
        ON irrigation_events(field_id, end_time);
    "#,
];

pub fn run(db: &Database) -> Result<()> {
    db.with_conn_mut(|conn| {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            "#,
        )?;

        let current_version: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )?;

        for (i, migration) in MIGRATIONS.iter().enumerate() {
            let version = (i + 1) as i32;
            if version > current_version {
                tracing::info!("Applying migration {}", version);
                let tx = conn.transaction()?;
                tx.execute_batch(migration)?;
                tx.execute("INSERT INTO schema_migrations (version) VALUES (?1)", [version])?;
                tx.commit()?;
            }
        }

        Ok(())
    })
}
