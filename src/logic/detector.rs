//! Per-zone session detection.
//!
//! ```text
//! Idle ──[flow >= start]──▶ Rising ──[N readings >= start]──▶ Active
//!  ▲                          │                               │   ▲
//!  └──────[flow < start]──────┘               [flow < end]    ▼   │ [flow >= end]
//!  ▲                                                       Falling
//!  └────────────────[M consecutive readings < end]────────────┘
//! ```
//!
//! The detector is pure: it takes the zone's current session and cursor and
//! returns the next ones. Callers persist the result afterwards, so a storage
//! failure never changes which transition a reading produced.

use crate::config::DetectorConfig;
use crate::error::{IrrigOpsError, Result};
use crate::models::{Reading, Session, SessionState, ZoneCursor, ZonePhase};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// Idle zone, flow below start threshold.
    Ignored,
    /// Idle → Rising
    Started,
    /// Still Rising, one more reading at or above start.
    Rising,
    /// Rising → Idle. The provisional session is discarded.
    Reset,
    /// Rising → Active. The session is now open.
    Opened,
    /// Active, flow at or above end threshold.
    Continued,
    /// Active → Falling, or one more low reading while Falling.
    Falling,
    /// Falling → Active
    Recovered,
    /// Falling → Idle. The session is handed to the aggregator.
    Ended,
}

impl Transition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Ignored => "ignored",
            Transition::Started => "started",
            Transition::Rising => "rising",
            Transition::Reset => "reset",
            Transition::Opened => "opened",
            Transition::Continued => "continued",
            Transition::Falling => "falling",
            Transition::Recovered => "recovered",
            Transition::Ended => "ended",
        }
    }
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of feeding one reading to the detector.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub transition: Transition,
    /// Session after this reading; `None` means the zone is Idle.
    pub session: Option<Session>,
    /// Session that just ended and must be finalized.
    pub finished: Option<Session>,
    pub cursor: ZoneCursor,
}

impl Step {
    pub fn phase(&self) -> ZonePhase {
        self.session
            .as_ref()
            .map(|s| s.phase())
            .unwrap_or(ZonePhase::Idle)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionDetector {
    config: DetectorConfig,
}

impl SessionDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Rejects duplicates, out-of-order readings and counter regressions
    /// without touching any state.
    pub fn check(&self, cursor: Option<&ZoneCursor>, reading: &Reading) -> Result<()> {
        let Some(cursor) = cursor else {
            return Ok(());
        };

        if reading.timestamp <= cursor.last_reading_at {
            return Err(IrrigOpsError::OutOfOrderReading {
                zone_id: reading.zone_id.clone(),
                timestamp: reading.timestamp,
                last_processed: cursor.last_reading_at,
            });
        }

        if let (Some(previous), Some(reported)) =
            (cursor.last_cumulative_gallons, reading.cumulative_gallons)
        {
            if reported < previous {
                return Err(IrrigOpsError::CounterRegression {
                    zone_id: reading.zone_id.clone(),
                    previous,
                    reported,
                });
            }
        }

        Ok(())
    }

    pub fn observe(
        &self,
        session: Option<&Session>,
        cursor: Option<&ZoneCursor>,
        reading: &Reading,
        field_id: &str,
    ) -> Result<Step> {
        self.check(cursor, reading)?;

        let cursor = ZoneCursor {
            zone_id: reading.zone_id.clone(),
            last_reading_at: reading.timestamp,
            last_cumulative_gallons: reading
                .cumulative_gallons
                .or_else(|| cursor.and_then(|c| c.last_cumulative_gallons)),
        };

        let flow = reading.flow_rate_gpm;
        let start = self.config.start_threshold_gpm;
        let end = self.config.end_threshold_gpm;

        let step = match session {
            None if flow >= start => {
                let mut fresh = Session {
                    zone_id: reading.zone_id.clone(),
                    field_id: field_id.to_string(),
                    state: SessionState::Rising {
                        consecutive_above: 1,
                    },
                    start_time: reading.timestamp,
                    last_above_threshold_time: reading.timestamp,
                    last_below_threshold_time: None,
                    accumulated_gallons: 0.0,
                    tail_gallons: 0.0,
                    reading_count: 1,
                    last_reading_at: reading.timestamp,
                    last_flow_gpm: flow,
                    first_cumulative_gallons: reading.cumulative_gallons,
                    last_cumulative_gallons: reading.cumulative_gallons,
                    cumulative_complete: reading.cumulative_gallons.is_some(),
                };
                let transition = if self.config.start_readings <= 1 {
                    fresh.state = SessionState::Active;
                    Transition::Opened
                } else {
                    Transition::Started
                };
                Step {
                    transition,
                    session: Some(fresh),
                    finished: None,
                    cursor,
                }
            }
            None => Step {
                transition: Transition::Ignored,
                session: None,
                finished: None,
                cursor,
            },
            Some(current) => {
                let mut next = current.clone();
                accumulate(&mut next, reading, flow >= end);

                match current.state {
                    SessionState::Rising { consecutive_above } => {
                        if flow < start {
                            Step {
                                transition: Transition::Reset,
                                session: None,
                                finished: None,
                                cursor,
                            }
                        } else {
                            let count = consecutive_above + 1;
                            next.last_above_threshold_time = reading.timestamp;
                            let transition = if count >= self.config.start_readings {
                                next.state = SessionState::Active;
                                Transition::Opened
                            } else {
                                next.state = SessionState::Rising {
                                    consecutive_above: count,
                                };
                                Transition::Rising
                            };
                            Step {
                                transition,
                                session: Some(next),
                                finished: None,
                                cursor,
                            }
                        }
                    }
                    SessionState::Active | SessionState::Falling { .. } => {
                        if flow < end {
                            let count = current.consecutive_below() + 1;
                            next.last_below_threshold_time = Some(reading.timestamp);
                            if count >= self.config.end_readings {
                                next.state = SessionState::Falling {
                                    consecutive_below: count,
                                };
                                Step {
                                    transition: Transition::Ended,
                                    session: None,
                                    finished: Some(next),
                                    cursor,
                                }
                            } else {
                                next.state = SessionState::Falling {
                                    consecutive_below: count,
                                };
                                Step {
                                    transition: Transition::Falling,
                                    session: Some(next),
                                    finished: None,
                                    cursor,
                                }
                            }
                        } else {
                            next.last_above_threshold_time = reading.timestamp;
                            let transition = if current.phase() == ZonePhase::Falling {
                                Transition::Recovered
                            } else {
                                Transition::Continued
                            };
                            next.state = SessionState::Active;
                            Step {
                                transition,
                                session: Some(next),
                                finished: None,
                                cursor,
                            }
                        }
                    }
                }
            }
        };

        Ok(step)
    }
}

/// Left-rectangle integration: the previous reading's flow is held until
/// this reading arrives. Intervals ending on a low reading stay in the tail
/// until flow recovers, so volume covers the same window as the event's
/// duration (first reading to last flowing reading).
fn accumulate(session: &mut Session, reading: &Reading, flowing: bool) {
    let elapsed_min =
        (reading.timestamp - session.last_reading_at).num_milliseconds() as f64 / 60_000.0;
    let gallons = session.last_flow_gpm * elapsed_min.max(0.0);
    if flowing {
        session.accumulated_gallons += session.tail_gallons + gallons;
        session.tail_gallons = 0.0;
    } else {
        session.tail_gallons += gallons;
    }
    session.reading_count += 1;
    session.last_reading_at = reading.timestamp;
    session.last_flow_gpm = reading.flow_rate_gpm;

    match reading.cumulative_gallons {
        Some(c) if flowing && session.cumulative_complete => {
            session.last_cumulative_gallons = Some(c)
        }
        Some(_) => {}
        None => session.cumulative_complete = false,
    }
}
