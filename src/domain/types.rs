use chrono::Duration;
use serde::{Deserialize, Serialize};

// ============================================================================
// Slot Granularity
// ============================================================================

/// Length of one scheduling slot in minutes.
pub const SLOT_MINUTES: i64 = 15;

/// Length of one scheduling slot in hours.
pub const SLOT_HOURS: f64 = 0.25;

/// Upper bound on the planning horizon (10 days of 15-minute slots).
pub const MAX_HORIZON_SLOTS: usize = 10 * 96;

pub fn slot_duration() -> Duration {
    Duration::minutes(SLOT_MINUTES)
}

// ============================================================================
// Sensor Readings
// ============================================================================

/// A sensor reading that is either a usable value or explicitly unavailable.
///
/// Missing readings are never coerced to zero: an unavailable hourly energy
/// reading would otherwise understate consumption and let the throttle fail
/// open.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "Option<f64>", into = "Option<f64>")]
pub enum Measurement {
    Available(f64),
    Unavailable,
}

impl Measurement {
    /// Parse a raw sensor state string.
    ///
    /// `"unavailable"`, `"unknown"`, empty strings, non-numeric and non-finite
    /// values all map to [`Measurement::Unavailable`].
    pub fn parse(raw: &str) -> Self {
        raw.trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map_or(Self::Unavailable, Self::Available)
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Available(v) => Some(*v),
            Self::Unavailable => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }
}

impl From<Option<f64>> for Measurement {
    fn from(v: Option<f64>) -> Self {
        match v {
            Some(x) if x.is_finite() => Self::Available(x),
            _ => Self::Unavailable,
        }
    }
}

impl From<Measurement> for Option<f64> {
    fn from(m: Measurement) -> Self {
        m.value()
    }
}

impl Default for Measurement {
    fn default() -> Self {
        Self::Unavailable
    }
}

impl std::fmt::Display for Measurement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Available(v) => write!(f, "{v:.3}"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
