use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a zone sits in the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZonePhase {
    Idle,
    Rising,
    Active,
    Falling,
}

impl ZonePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZonePhase::Idle => "idle",
            ZonePhase::Rising => "rising",
            ZonePhase::Active => "active",
            ZonePhase::Falling => "falling",
        }
    }

    /// Rising sessions are provisional; only Active/Falling count as open.
    pub fn is_open(&self) -> bool {
        matches!(self, ZonePhase::Active | ZonePhase::Falling)
    }
}

impl std::fmt::Display for ZonePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Non-idle states, with the debounce counter each one needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Rising { consecutive_above: u32 },
    Active,
    Falling { consecutive_below: u32 },
}

impl SessionState {
    pub fn phase(&self) -> ZonePhase {
        match self {
            SessionState::Rising { .. } => ZonePhase::Rising,
            SessionState::Active => ZonePhase::Active,
            SessionState::Falling { .. } => ZonePhase::Falling,
        }
    }

    pub fn consecutive_above(&self) -> u32 {
        match self {
            SessionState::Rising { consecutive_above } => *consecutive_above,
            _ => 0,
        }
    }

    pub fn consecutive_below(&self) -> u32 {
        match self {
            SessionState::Falling { consecutive_below } => *consecutive_below,
            _ => 0,
        }
    }

    pub fn from_parts(phase: &str, consecutive_above: u32, consecutive_below: u32) -> Option<Self> {
        match phase {
            "rising" => Some(SessionState::Rising { consecutive_above }),
            "active" => Some(SessionState::Active),
            "falling" => Some(SessionState::Falling { consecutive_below }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub zone_id: String,
    pub field_id: String,
    pub state: SessionState,
    pub start_time: DateTime<Utc>,
    /// Last reading at or above the end threshold, i.e. still flowing.
    pub last_above_threshold_time: DateTime<Utc>,
    pub last_below_threshold_time: Option<DateTime<Utc>>,
    pub accumulated_gallons: f64,
    /// Gallons integrated since the last flowing reading. Folded into
    /// `accumulated_gallons` only if flow recovers.
    #[serde(default)]
    pub tail_gallons: f64,
    pub reading_count: u32,
    pub last_reading_at: DateTime<Utc>,
    pub last_flow_gpm: f64,
    pub first_cumulative_gallons: Option<f64>,
    pub last_cumulative_gallons: Option<f64>,
    /// False once any reading in the session arrived without a counter.
    pub cumulative_complete: bool,
}

impl Session {
    pub fn phase(&self) -> ZonePhase {
        self.state.phase()
    }

    pub fn consecutive_above(&self) -> u32 {
        self.state.consecutive_above()
    }

    pub fn consecutive_below(&self) -> u32 {
        self.state.consecutive_below()
    }

    pub fn minutes_since_last_reading(&self, now: DateTime<Utc>) -> f64 {
        (now - self.last_reading_at).num_milliseconds() as f64 / 60_000.0
    }
}
