use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "irrigops",
    version,
    about = "Vineyard irrigation monitoring and water balance"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to config.yaml
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override SQLite data directory
    #[arg(short, long)]
    pub data_dir: Option<PathBuf>,

    /// Increase log verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Feed flow readings (one JSON object per line) from a file or stdin
    Ingest {
        /// Device token the readings arrived with
        #[arg(short, long, env = "IRRIGOPS_DEVICE_TOKEN")]
        token: String,
        /// Newline-delimited JSON readings; stdin when omitted
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Close a zone's session now and record whatever it collected
    Stop { zone_id: String },
    /// Apply a day of ET, rainfall and irrigation to field water balances
    Recompute {
        /// Fields to update; all registered fields when omitted
        #[arg(short, long)]
        field: Vec<String>,
        /// Day to apply (defaults to yesterday)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Irrigation recommendation for a field
    Recommend {
        field_id: String,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Variable-rate irrigation zones
    Vri {
        #[command(subcommand)]
        action: VriAction,
    },
    /// Alert on open sessions whose device has gone quiet
    Sweep,
    /// Validate config and sync the device registry
    Check,
}

#[derive(Subcommand)]
pub enum VriAction {
    /// Build zones from an NDVI raster JSON file
    Build { field_id: String, raster: PathBuf },
    /// Show stored zones
    Show { field_id: String },
    /// Override one zone's irrigation multiplier
    SetMultiplier {
        field_id: String,
        zone_name: String,
        multiplier_pct: f64,
    },
}
