use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration rejected at load time. No schedule is produced with an
/// invalid configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] figment::Error),
    #[error("Invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors that make a scheduling cycle refuse to produce a schedule.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Invalid vehicle state: {0}")]
    InvalidVehicleState(String),
    #[error("Invalid charger limits: {0}")]
    InvalidChargerLimits(String),
    #[error("Vehicle state of charge unavailable")]
    SocUnavailable,
}

/// Non-fatal conditions attached to a published schedule.
///
/// Every fault keeps the cycle alive: the schedule still represents the best
/// achievable effort and the next cycle starts from scratch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleFault {
    /// Forecast has a hole; slots at or after `at` are unknown.
    DataGap {
        at: DateTime<FixedOffset>,
        resumes_at: DateTime<FixedOffset>,
    },
    /// Two forecast entries cover the same wall-clock time.
    DataOverlap { at: DateTime<FixedOffset> },
    /// Entry granularity is neither ~15 minutes nor hourly.
    UnsupportedDuration {
        at: DateTime<FixedOffset>,
        duration_minutes: u32,
    },
    /// Price is NaN or infinite.
    InvalidPrice { at: DateTime<FixedOffset> },
    /// No usable slot between now and the end of the forecast.
    EmptyHorizon,
    /// The guarantee cannot be met by the deadline even with every slot.
    GuaranteeAtRisk {
        needed_kwh: f64,
        scheduled_kwh: f64,
    },
    /// A tariff-mode measurement was missing and a fallback was used.
    SensorUnavailable { sensor: String },
}

impl ScheduleFault {
    /// Data faults truncate the horizon; everything after the fault is unknown.
    pub fn is_data_fault(&self) -> bool {
        matches!(
            self,
            Self::DataGap { .. }
                | Self::DataOverlap { .. }
                | Self::UnsupportedDuration { .. }
                | Self::InvalidPrice { .. }
                | Self::EmptyHorizon
        )
    }
}

impl std::fmt::Display for ScheduleFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DataGap { at, resumes_at } => {
                write!(f, "forecast gap from {at} to {resumes_at}")
            }
            Self::DataOverlap { at } => write!(f, "overlapping forecast entries at {at}"),
            Self::UnsupportedDuration {
                at,
                duration_minutes,
            } => write!(f, "unsupported {duration_minutes} minute entry at {at}"),
            Self::InvalidPrice { at } => write!(f, "invalid price at {at}"),
            Self::EmptyHorizon => write!(f, "no usable forecast slots"),
            Self::GuaranteeAtRisk {
                needed_kwh,
                scheduled_kwh,
            } => write!(
                f,
                "guarantee degraded: needed {needed_kwh:.2} kWh, scheduled {scheduled_kwh:.2} kWh"
            ),
            Self::SensorUnavailable { sensor } => write!(f, "sensor unavailable: {sensor}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_fault_classification() {
        assert!(ScheduleFault::EmptyHorizon.is_data_fault());
        assert!(!ScheduleFault::GuaranteeAtRisk {
            needed_kwh: 10.0,
            scheduled_kwh: 4.0
        }
        .is_data_fault());
        assert!(!ScheduleFault::SensorUnavailable {
            sensor: "other_load_kw".to_string()
        }
        .is_data_fault());
    }

    #[test]
    fn test_fault_serializes_with_kind_tag() {
        let json = serde_json::to_value(ScheduleFault::EmptyHorizon).unwrap();
        assert_eq!(json["kind"], "empty_horizon");
    }
}
