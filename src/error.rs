use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IrrigOpsError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Out-of-order reading for zone {zone_id}: {timestamp} is not after {last_processed}")]
    OutOfOrderReading {
        zone_id: String,
        timestamp: DateTime<Utc>,
        last_processed: DateTime<Utc>,
    },

    #[error("Cumulative counter went backwards for zone {zone_id}: {reported} < {previous} gallons")]
    CounterRegression {
        zone_id: String,
        previous: f64,
        reported: f64,
    },

    #[error("Persistence failure: {0}")]
    Persistence(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Data source unavailable: {0}")]
    DataSourceUnavailable(String),
}

impl IrrigOpsError {
    /// Only storage failures are worth retrying; everything else is terminal
    /// for the reading that produced it.
    pub fn is_retryable(&self) -> bool {
        matches!(self, IrrigOpsError::Persistence(_))
    }

    /// Readings dropped without surfacing an error to the sender.
    pub fn is_drop(&self) -> bool {
        matches!(
            self,
            IrrigOpsError::OutOfOrderReading { .. } | IrrigOpsError::CounterRegression { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, IrrigOpsError>;
