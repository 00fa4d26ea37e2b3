use crate::config::OpenMeteoConfig;
use crate::error::{IrrigOpsError, Result};
use crate::models::FieldContext;
use crate::ports::{ClimateDay, ClimateFeed};
use chrono::{Duration, NaiveDate};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct OpenMeteoClient {
    client: reqwest::Client,
    config: OpenMeteoConfig,
}

// Open-Meteo daily response
#[derive(Debug, Deserialize)]
struct OmResponse {
    daily: OmDaily,
}

#[derive(Debug, Deserialize)]
struct OmDaily {
    time: Vec<String>,
    #[serde(default)]
    et0_fao_evapotranspiration: Vec<Option<f64>>,
    #[serde(default)]
    precipitation_sum: Vec<Option<f64>>,
}

/// One day of climate data for a field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyClimate {
    pub date: NaiveDate,
    pub reference_et_mm: Option<f64>,
    pub rainfall_mm: Option<f64>,
}

impl DailyClimate {
    /// Water-balance inputs for this day. Missing ET is an error; missing
    /// precipitation means no rain was measured.
    pub fn climate_day(&self) -> Result<ClimateDay> {
        let reference_et_mm = self.reference_et_mm.ok_or_else(|| {
            IrrigOpsError::DataSourceUnavailable(format!("no reference ET for {}", self.date))
        })?;
        Ok(ClimateDay {
            reference_et_mm,
            rainfall_mm: self.rainfall_mm.unwrap_or(0.0),
        })
    }
}

impl OpenMeteoClient {
    pub fn new(config: OpenMeteoConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Daily FAO-56 reference ET and precipitation for `[start, end]`.
    pub async fn fetch_daily(
        &self,
        field: &FieldContext,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyClimate>> {
        if !self.config.enabled {
            return Err(IrrigOpsError::DataSourceUnavailable(
                "Open-Meteo is disabled".into(),
            ));
        }
        let (Some(lat), Some(lon)) = (field.latitude, field.longitude) else {
            return Err(IrrigOpsError::Validation(format!(
                "field {} has no coordinates",
                field.field_id
            )));
        };

        let url = format!(
            "{}/forecast?latitude={}&longitude={}&daily=et0_fao_evapotranspiration,precipitation_sum\
             &timezone=auto&start_date={}&end_date={}",
            self.config.base_url.trim_end_matches('/'),
            lat,
            lon,
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d")
        );
        debug!(field_id = %field.field_id, %start, %end, "Fetching Open-Meteo daily data");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| IrrigOpsError::DataSourceUnavailable(format!("Open-Meteo: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(IrrigOpsError::DataSourceUnavailable(format!(
                "Open-Meteo returned {}: {}",
                status, body
            )));
        }

        let body = response.text().await.map_err(|e| {
            IrrigOpsError::DataSourceUnavailable(format!("Open-Meteo body: {}", e))
        })?;
        parse_daily(&body)
    }

    async fn day(&self, field: &FieldContext, date: NaiveDate) -> Result<DailyClimate> {
        self.fetch_daily(field, date, date)
            .await?
            .into_iter()
            .find(|d| d.date == date)
            .ok_or_else(|| {
                IrrigOpsError::DataSourceUnavailable(format!("Open-Meteo has no data for {}", date))
            })
    }
}

fn parse_daily(body: &str) -> Result<Vec<DailyClimate>> {
    let response: OmResponse = serde_json::from_str(body).map_err(|e| {
        IrrigOpsError::DataSourceUnavailable(format!("Failed to parse Open-Meteo response: {}", e))
    })?;
    let daily = response.daily;

    daily
        .time
        .iter()
        .enumerate()
        .map(|(i, day)| {
            let date = NaiveDate::parse_from_str(day, "%Y-%m-%d").map_err(|e| {
                IrrigOpsError::DataSourceUnavailable(format!("Open-Meteo date '{}': {}", day, e))
            })?;
            Ok(DailyClimate {
                date,
                reference_et_mm: daily.et0_fao_evapotranspiration.get(i).copied().flatten(),
                rainfall_mm: daily.precipitation_sum.get(i).copied().flatten(),
            })
        })
        .collect()
}

impl ClimateFeed for OpenMeteoClient {
    async fn reference_et(&self, field: &FieldContext, date: NaiveDate) -> Result<f64> {
        Ok(self.day(field, date).await?.climate_day()?.reference_et_mm)
    }

    async fn rainfall(&self, field: &FieldContext, date: NaiveDate) -> Result<f64> {
        // Open-Meteo reports null for days without a measurement.
        Ok(self.day(field, date).await?.rainfall_mm.unwrap_or(0.0))
    }

    async fn climate_day(&self, field: &FieldContext, date: NaiveDate) -> Result<ClimateDay> {
        self.day(field, date).await?.climate_day()
    }

    async fn forecast_reference_et(
        &self,
        field: &FieldContext,
        start: NaiveDate,
        days: u32,
    ) -> Result<Vec<f64>> {
        if days == 0 {
            return Ok(Vec::new());
        }
        let end = start + Duration::days(days as i64 - 1);
        Ok(self
            .fetch_daily(field, start, end)
            .await?
            .into_iter()
            .filter_map(|d| d.reference_et_mm)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_daily_response() {
        let body = r#"{
            "latitude": 38.5,
            "longitude": -122.4,
            "daily_units": {"time": "iso8601", "et0_fao_evapotranspiration": "mm"},
            "daily": {
                "time": ["2026-07-01", "2026-07-02"],
                "et0_fao_evapotranspiration": [6.12, null],
                "precipitation_sum": [0.0, 3.4]
            }
        }"#;
        let days = parse_daily(body).unwrap();
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].date, NaiveDate::from_ymd_opt(2026, 7, 1).unwrap());
        assert_eq!(days[0].reference_et_mm, Some(6.12));
        assert_eq!(days[1].reference_et_mm, None);
        assert_eq!(days[1].rainfall_mm, Some(3.4));
    }

    #[test]
    fn one_response_day_feeds_both_inputs() {
        let date = NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();
        let day = DailyClimate {
            date,
            reference_et_mm: Some(5.8),
            rainfall_mm: None,
        };
        assert_eq!(
            day.climate_day().unwrap(),
            ClimateDay {
                reference_et_mm: 5.8,
                rainfall_mm: 0.0,
            }
        );

        let missing = DailyClimate {
            reference_et_mm: None,
            ..day
        };
        assert!(matches!(
            missing.climate_day(),
            Err(IrrigOpsError::DataSourceUnavailable(_))
        ));
    }

    #[test]
    fn malformed_response_is_unavailable() {
        assert!(matches!(
            parse_daily("{\"error\": true}"),
            Err(IrrigOpsError::DataSourceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn field_without_coordinates_rejected() {
        let client = OpenMeteoClient::new(OpenMeteoConfig::default());
        let field = FieldContext {
            field_id: "block-a".into(),
            name: "Block A".into(),
            area_acres: 10.0,
            flow_rate_gpm: 200.0,
            method: crate::models::IrrigationMethod::Drip,
            latitude: None,
            longitude: None,
        };
        let day = NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();
        assert!(matches!(
            client.reference_et(&field, day).await,
            Err(IrrigOpsError::Validation(_))
        ));
    }
}
