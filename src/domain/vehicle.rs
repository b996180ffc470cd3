use chrono::{DateTime, Duration, FixedOffset, NaiveTime, TimeZone};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

/// Snapshot of the vehicle battery and charging goals for one scheduling cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleState {
    /// Current state of charge (%)
    pub current_soc: f64,
    /// Desired state of charge for optional charging (%)
    pub target_soc: f64,
    /// State of charge that must be reached by `guarantee_deadline` (%)
    pub min_soc_guarantee: f64,
    pub guarantee_deadline: DateTime<FixedOffset>,
    pub battery_capacity_kwh: f64,
    /// Grid-to-battery efficiency in (0, 1]
    pub charging_efficiency: f64,
}

impl VehicleState {
    pub fn validate(&self) -> Result<(), SchedulerError> {
        for (name, soc) in [
            ("current_soc", self.current_soc),
            ("target_soc", self.target_soc),
            ("min_soc_guarantee", self.min_soc_guarantee),
        ] {
            if !soc.is_finite() || !(0.0..=100.0).contains(&soc) {
                return Err(SchedulerError::InvalidVehicleState(format!(
                    "{name} must be within 0..=100, got {soc}"
                )));
            }
        }
        if !self.battery_capacity_kwh.is_finite() || self.battery_capacity_kwh <= 0.0 {
            return Err(SchedulerError::InvalidVehicleState(format!(
                "battery_capacity_kwh must be positive, got {}",
                self.battery_capacity_kwh
            )));
        }
        if !self.charging_efficiency.is_finite()
            || self.charging_efficiency <= 0.0
            || self.charging_efficiency > 1.0
        {
            return Err(SchedulerError::InvalidVehicleState(format!(
                "charging_efficiency must be within (0, 1], got {}",
                self.charging_efficiency
            )));
        }
        Ok(())
    }

    /// Grid energy (kWh) required to lift the battery from `from_soc` to `to_soc`.
    ///
    /// Accounts for charging losses; never negative.
    pub fn grid_energy_between(&self, from_soc: f64, to_soc: f64) -> f64 {
        let delta = (to_soc - from_soc).max(0.0);
        delta / 100.0 * self.battery_capacity_kwh / self.charging_efficiency
    }

    /// Grid energy needed to reach the guarantee from the current SOC.
    pub fn energy_for_guarantee(&self) -> f64 {
        self.grid_energy_between(self.current_soc, self.min_soc_guarantee)
    }

    /// SOC after delivering `grid_kwh` from `from_soc`, capped at `limit`.
    pub fn soc_after(&self, from_soc: f64, grid_kwh: f64, limit: f64) -> f64 {
        let gained = grid_kwh.max(0.0) * self.charging_efficiency / self.battery_capacity_kwh * 100.0;
        (from_soc + gained).min(limit)
    }

    pub fn guarantee_met(&self) -> bool {
        self.current_soc >= self.min_soc_guarantee
    }

    pub fn target_met(&self) -> bool {
        self.current_soc >= self.target_soc
    }
}

/// Next occurrence of the daily deadline `at` strictly after `now` in `tz`.
///
/// A deadline that falls into a DST gap moves forward by one hour; an
/// ambiguous one resolves to the earlier instant.
pub fn next_deadline(now: DateTime<FixedOffset>, at: NaiveTime, tz: Tz) -> DateTime<FixedOffset> {
    let local_now = now.with_timezone(&tz);
    let mut date = local_now.date_naive();
    loop {
        let naive = date.and_time(at);
        let resolved = tz
            .from_local_datetime(&naive)
            .earliest()
            .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest());
        if let Some(candidate) = resolved {
            if candidate > local_now {
                return candidate.fixed_offset();
            }
        }
        date = match date.succ_opt() {
            Some(d) => d,
            None => return (now + Duration::days(1)).fixed_offset(),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vehicle(current_soc: f64) -> VehicleState {
        VehicleState {
            current_soc,
            target_soc: 80.0,
            min_soc_guarantee: 50.0,
            guarantee_deadline: DateTime::parse_from_rfc3339("2025-01-11T07:00:00+01:00").unwrap(),
            battery_capacity_kwh: 75.0,
            charging_efficiency: 0.9,
        }
    }

    #[test]
    fn test_energy_for_guarantee() {
        let v = vehicle(30.0);
        // 20% of 75 kWh = 15 kWh in the battery, 15 / 0.9 from the grid
        assert!((v.energy_for_guarantee() - 15.0 / 0.9).abs() < 1e-9);
        assert_eq!(vehicle(60.0).energy_for_guarantee(), 0.0);
    }

    #[test]
    fn test_soc_after_is_capped() {
        let v = vehicle(30.0);
        let soc = v.soc_after(30.0, 15.0 / 0.9, 100.0);
        assert!((soc - 50.0).abs() < 1e-9);
        assert_eq!(v.soc_after(30.0, 1000.0, 80.0), 80.0);
    }

    #[test]
    fn test_validate_rejects_bad_state() {
        let mut v = vehicle(30.0);
        assert!(v.validate().is_ok());
        v.charging_efficiency = 0.0;
        assert!(v.validate().is_err());
        let mut v = vehicle(130.0);
        assert!(v.validate().is_err());
        v.current_soc = f64::NAN;
        assert!(v.validate().is_err());
    }

    #[test]
    fn test_next_deadline_today_or_tomorrow() {
        let tz: Tz = "Europe/Stockholm".parse().unwrap();
        let at = NaiveTime::from_hms_opt(7, 0, 0).unwrap();

        let early = DateTime::parse_from_rfc3339("2025-01-10T05:30:00+01:00").unwrap();
        let d = next_deadline(early, at, tz);
        assert_eq!(d, DateTime::parse_from_rfc3339("2025-01-10T07:00:00+01:00").unwrap());

        let late = DateTime::parse_from_rfc3339("2025-01-10T07:00:00+01:00").unwrap();
        let d = next_deadline(late, at, tz);
        assert_eq!(d, DateTime::parse_from_rfc3339("2025-01-11T07:00:00+01:00").unwrap());
    }

    #[test]
    fn test_next_deadline_in_dst_gap_moves_forward() {
        let tz: Tz = "Europe/Stockholm".parse().unwrap();
        // 02:30 does not exist on 2025-03-30 in Stockholm
        let at = NaiveTime::from_hms_opt(2, 30, 0).unwrap();
        let now = DateTime::parse_from_rfc3339("2025-03-30T00:00:00+01:00").unwrap();
        let d = next_deadline(now, at, tz);
        assert_eq!(d, DateTime::parse_from_rfc3339("2025-03-30T03:30:00+02:00").unwrap());
    }
}
