mod cli;

use anyhow::{bail, Context, Result};
use chrono::{Duration, Utc};
use clap::Parser;
use cli::{Cli, Commands, VriAction};
use irrigops::config::Config;
use irrigops::datasources::OpenMeteoClient;
use irrigops::db::Database;
use irrigops::error::IrrigOpsError;
use irrigops::logic::{FlowEngine, IngestOutcome};
use irrigops::models::{NdviRaster, RawReading};
use irrigops::ports::{LogNotifier, VriZoneStore};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// NDVI raster file; `null` marks cells with no data.
#[derive(Debug, Deserialize)]
struct RasterFile {
    width: usize,
    height: usize,
    cell_area_acres: f64,
    values: Vec<Option<f64>>,
}

impl From<RasterFile> for NdviRaster {
    fn from(file: RasterFile) -> Self {
        NdviRaster::new(
            file.width,
            file.height,
            file.cell_area_acres,
            file.values
                .into_iter()
                .map(|v| v.unwrap_or(f64::NAN))
                .collect(),
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match Config::load(cli.config.clone()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            eprintln!("Please copy config/config.yaml.example to config/config.yaml");
            std::process::exit(1);
        }
    };

    let db_path = Config::db_path(cli.data_dir.as_ref())?;
    let db = Database::open(&db_path)
        .with_context(|| format!("opening database at {}", db_path.display()))?;
    db.sync_registry(&config.registry)?;

    let engine = FlowEngine::new(
        config.clone(),
        Arc::new(db.clone()),
        Arc::new(db.clone()),
        Arc::new(LogNotifier),
    );
    let feed = OpenMeteoClient::new(config.open_meteo.clone().unwrap_or_default());

    match cli.command {
        Commands::Ingest { token, file } => ingest(&engine, &token, file.as_deref()).await?,
        Commands::Stop { zone_id } => {
            let event = engine.stop_session(&zone_id).await?;
            print_json(&event)?;
        }
        Commands::Recompute { field, date } => {
            let date = date.unwrap_or_else(|| Utc::now().date_naive() - Duration::days(1));
            let field_ids = if field.is_empty() {
                db.list_fields()?.into_iter().map(|f| f.field_id).collect()
            } else {
                field
            };

            let mut failed = 0;
            for (field_id, result) in engine.recompute_fields(feed, field_ids, date).await {
                match result {
                    Ok(report) => print_json(&report)?,
                    Err(e) => {
                        failed += 1;
                        eprintln!("{}: {}", field_id, e);
                    }
                }
            }
            if failed > 0 {
                bail!("{} field(s) failed to recompute", failed);
            }
        }
        Commands::Recommend { field_id, date } => {
            let today = date.unwrap_or_else(|| Utc::now().date_naive());
            let rec = engine.get_recommendation(&feed, &field_id, today).await?;
            print_json(&rec)?;
        }
        Commands::Vri { action } => match action {
            VriAction::Build { field_id, raster } => {
                let contents = std::fs::read_to_string(&raster)
                    .with_context(|| format!("reading {}", raster.display()))?;
                let file: RasterFile = serde_json::from_str(&contents)
                    .with_context(|| format!("parsing {}", raster.display()))?;
                let zones = engine
                    .build_vri_zones(&field_id, &file.into(), &config.vri)
                    .await?;
                print_json(&zones)?;
            }
            VriAction::Show { field_id } => print_json(&db.load_zones(&field_id)?)?,
            VriAction::SetMultiplier {
                field_id,
                zone_name,
                multiplier_pct,
            } => {
                engine
                    .update_vri_multiplier(&field_id, &zone_name, multiplier_pct)
                    .await?;
                println!("{} on {} set to {}%", zone_name, field_id, multiplier_pct);
            }
        },
        Commands::Sweep => {
            let alerts = engine.sweep_stale_sessions(Utc::now()).await?;
            print_json(&alerts)?;
        }
        Commands::Check => {
            let fields = &config.registry.fields;
            let devices: usize = fields.iter().map(|f| f.devices.len()).sum();
            let zones: usize = fields
                .iter()
                .flat_map(|f| &f.devices)
                .map(|d| d.zones.len())
                .sum();
            println!("Configuration OK");
            println!("  Database:  {}", db.path().display());
            println!(
                "  Registry:  {} fields, {} devices, {} zones",
                fields.len(),
                devices,
                zones
            );
            match &config.open_meteo {
                Some(om) if om.enabled => println!("  Open-Meteo: {}", om.base_url),
                Some(_) => println!("  Open-Meteo: disabled"),
                None => println!("  Open-Meteo: default endpoint"),
            }
        }
    }

    Ok(())
}

#[derive(Debug, Default)]
struct IngestSummary {
    applied: usize,
    dropped: usize,
    rejected: usize,
    persistence_failures: usize,
}

async fn ingest(engine: &FlowEngine, token: &str, file: Option<&Path>) -> Result<()> {
    let reader: Box<dyn BufRead> = match file {
        Some(path) => Box::new(BufReader::new(
            std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(std::io::stdin())),
    };

    let mut summary = IngestSummary::default();
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let raw: RawReading = match serde_json::from_str(&line) {
            Ok(raw) => raw,
            Err(e) => {
                summary.rejected += 1;
                eprintln!("line {}: invalid JSON: {}", n + 1, e);
                continue;
            }
        };

        match engine.ingest_reading(token, &raw).await {
            Ok(outcome) => {
                if matches!(outcome, IngestOutcome::Dropped { .. }) {
                    summary.dropped += 1;
                } else {
                    summary.applied += 1;
                }
                println!("{}", serde_json::to_string(&outcome)?);
            }
            Err(e @ IrrigOpsError::Persistence(_)) => {
                summary.persistence_failures += 1;
                eprintln!("line {}: {}", n + 1, e);
            }
            Err(e) => {
                summary.rejected += 1;
                eprintln!("line {}: {}", n + 1, e);
            }
        }
    }

    tracing::info!(
        applied = summary.applied,
        dropped = summary.dropped,
        rejected = summary.rejected,
        "Ingest finished"
    );
    if summary.persistence_failures > 0 {
        bail!(
            "{} reading(s) could not be persisted; resend them to replay",
            summary.persistence_failures
        );
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
