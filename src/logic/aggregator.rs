use crate::config::NoiseFilterConfig;
use crate::models::{EventSource, IrrigationEvent, Session};

/// Why a finished session produced no event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Discard {
    TooShort { minutes: f64 },
    TooSmall { gallons: f64 },
}

#[derive(Debug, Clone, Copy)]
pub struct SessionAggregator {
    filter: NoiseFilterConfig,
}

impl SessionAggregator {
    pub fn new(filter: NoiseFilterConfig) -> Self {
        Self { filter }
    }

    /// Device counter delta when every reading in the session carried one,
    /// otherwise the integrated flow.
    pub fn total_gallons(session: &Session) -> f64 {
        match (
            session.cumulative_complete,
            session.first_cumulative_gallons,
            session.last_cumulative_gallons,
        ) {
            (true, Some(first), Some(last)) if last >= first => last - first,
            _ => session.accumulated_gallons,
        }
    }

    pub fn duration_minutes(session: &Session) -> f64 {
        (session.last_above_threshold_time - session.start_time).num_milliseconds() as f64
            / 60_000.0
    }

    pub fn finalize(&self, session: &Session) -> Result<IrrigationEvent, Discard> {
        let minutes = Self::duration_minutes(session);
        let gallons = Self::total_gallons(session);

        if minutes < self.filter.min_duration_minutes {
            return Err(Discard::TooShort { minutes });
        }
        if gallons < self.filter.min_gallons {
            return Err(Discard::TooSmall { gallons });
        }

        Ok(IrrigationEvent {
            zone_id: session.zone_id.clone(),
            field_id: session.field_id.clone(),
            start_time: session.start_time,
            end_time: session.last_above_threshold_time,
            total_gallons: gallons,
            avg_flow_gpm: gallons / minutes,
            source: EventSource::Sensor,
        })
    }
}

impl Default for SessionAggregator {
    fn default() -> Self {
        Self::new(NoiseFilterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionState;
    use chrono::{Duration, TimeZone, Utc};

    fn session(minutes: i64, gallons: f64) -> Session {
        let start = Utc.with_ymd_and_hms(2026, 7, 1, 5, 0, 0).unwrap();
        let end = start + Duration::minutes(minutes);
        Session {
            zone_id: "meter-1:1".into(),
            field_id: "block-a".into(),
            state: SessionState::Active,
            start_time: start,
            last_above_threshold_time: end,
            last_below_threshold_time: None,
            accumulated_gallons: gallons,
            tail_gallons: 0.0,
            reading_count: 10,
            last_reading_at: end,
            last_flow_gpm: 0.0,
            first_cumulative_gallons: None,
            last_cumulative_gallons: None,
            cumulative_complete: false,
        }
    }

    #[test]
    fn emits_event_with_average_flow() {
        let event = SessionAggregator::default()
            .finalize(&session(20, 100.0))
            .unwrap();
        assert_eq!(event.total_gallons, 100.0);
        assert!((event.avg_flow_gpm - 5.0).abs() < 1e-9);
        assert_eq!(event.source, EventSource::Sensor);
        assert!((event.duration_minutes() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn short_session_discarded() {
        let result = SessionAggregator::default().finalize(&session(2, 50.0));
        assert!(matches!(result, Err(Discard::TooShort { .. })));
    }

    #[test]
    fn small_session_discarded() {
        let result = SessionAggregator::default().finalize(&session(30, 4.9));
        assert!(matches!(result, Err(Discard::TooSmall { .. })));
    }

    #[test]
    fn prefers_device_counter_delta() {
        let mut s = session(30, 40.0);
        s.first_cumulative_gallons = Some(1_000.0);
        s.last_cumulative_gallons = Some(1_062.5);
        s.cumulative_complete = true;
        assert_eq!(SessionAggregator::total_gallons(&s), 62.5);
    }

    #[test]
    fn incomplete_counter_falls_back_to_integration() {
        let mut s = session(30, 40.0);
        s.first_cumulative_gallons = Some(1_000.0);
        s.last_cumulative_gallons = Some(1_062.5);
        s.cumulative_complete = false;
        assert_eq!(SessionAggregator::total_gallons(&s), 40.0);
    }
}
