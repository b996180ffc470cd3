use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone, Timelike};
use chrono_tz::Tz;

use crate::domain::SolarForecastPoint;

/// Longest span a single forecast point is trusted for.
const POINT_VALIDITY_MINUTES: i64 = 60;

/// Relative production per clock hour on a clear day.
const CURVE_RAW: [(u32, f64); 15] = [
    (5, 0.008),
    (6, 0.020),
    (7, 0.045),
    (8, 0.080),
    (9, 0.105),
    (10, 0.120),
    (11, 0.130),
    (12, 0.130),
    (13, 0.120),
    (14, 0.105),
    (15, 0.080),
    (16, 0.045),
    (17, 0.020),
    (18, 0.008),
    (19, 0.004),
];

/// Piecewise-constant solar forecast built from `(start, expected_kw)` points.
#[derive(Debug, Clone, Default)]
pub struct SolarProfile {
    points: Vec<SolarForecastPoint>,
}

impl SolarProfile {
    pub fn new(mut points: Vec<SolarForecastPoint>) -> Self {
        points.retain(|p| p.expected_kw.is_finite());
        points.sort_by_key(|p| p.start);
        Self { points }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Expected solar power at `t`, 0 when no point covers it.
    pub fn kw_at(&self, t: DateTime<FixedOffset>) -> f64 {
        let idx = self.points.partition_point(|p| p.start <= t);
        if idx == 0 {
            return 0.0;
        }
        let point = &self.points[idx - 1];
        let mut valid_until = point.start + Duration::minutes(POINT_VALIDITY_MINUTES);
        if let Some(next) = self.points.get(idx) {
            valid_until = valid_until.min(next.start);
        }
        if t < valid_until {
            point.expected_kw.max(0.0)
        } else {
            0.0
        }
    }
}

/// Distributes a daily production total over the daylight hours.
#[derive(Debug, Clone)]
pub struct SolarCurve {
    /// Share of daily production per clock hour, summing to 1
    weights: Vec<(u32, f64)>,
    /// Multiplier applied to the forecast total
    pub confidence: f64,
    /// House consumption subtracted from each hour (kW)
    pub baseload_kw: f64,
}

impl Default for SolarCurve {
    fn default() -> Self {
        Self::new(0.8, 1.0)
    }
}

impl SolarCurve {
    pub fn new(confidence: f64, baseload_kw: f64) -> Self {
        let sum: f64 = CURVE_RAW.iter().map(|(_, w)| w).sum();
        Self {
            weights: CURVE_RAW.iter().map(|(h, w)| (*h, w / sum)).collect(),
            confidence,
            baseload_kw,
        }
    }

    pub fn hour_fraction(&self, hour: u32) -> f64 {
        self.weights
            .iter()
            .find(|(h, _)| *h == hour)
            .map_or(0.0, |(_, w)| *w)
    }

    /// Hourly points for `day` carrying `total_kwh`, starting no earlier than `from_hour`.
    ///
    /// When `from_hour` cuts into the curve the remaining hours are
    /// renormalized so the remaining total is preserved. Hours outside
    /// `daylight` (sunrise, sunset) produce nothing.
    pub fn distribute(
        &self,
        day: NaiveDate,
        total_kwh: f64,
        from_hour: u32,
        tz: Tz,
        daylight: Option<(DateTime<FixedOffset>, DateTime<FixedOffset>)>,
    ) -> Vec<SolarForecastPoint> {
        if !total_kwh.is_finite() || total_kwh <= 0.0 {
            return Vec::new();
        }
        let remaining: f64 = self
            .weights
            .iter()
            .filter(|(h, _)| *h >= from_hour)
            .map(|(_, w)| w)
            .sum();
        if remaining <= 0.0 {
            return Vec::new();
        }

        self.weights
            .iter()
            .filter(|(h, _)| *h >= from_hour)
            .filter_map(|(hour, w)| {
                let start = tz
                    .from_local_datetime(&day.and_hms_opt(*hour, 0, 0)?)
                    .earliest()?
                    .fixed_offset();
                if let Some((sunrise, sunset)) = daylight {
                    if start < sunrise || start >= sunset {
                        return None;
                    }
                }
                // One hour of energy equals its average power
                let hour_kwh = total_kwh * w / remaining * self.confidence;
                Some(SolarForecastPoint {
                    start,
                    expected_kw: (hour_kwh - self.baseload_kw).max(0.0),
                })
            })
            .collect()
    }

    /// Points for the rest of today plus all of tomorrow.
    pub fn two_day_profile(
        &self,
        now: DateTime<FixedOffset>,
        tz: Tz,
        remaining_today_kwh: f64,
        tomorrow_kwh: f64,
    ) -> SolarProfile {
        let local = now.with_timezone(&tz);
        let today = local.date_naive();
        let mut points = self.distribute(today, remaining_today_kwh, local.hour(), tz, None);
        if let Some(tomorrow) = today.succ_opt() {
            points.extend(self.distribute(tomorrow, tomorrow_kwh, 0, tz, None));
        }
        SolarProfile::new(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(s).unwrap()
    }

    #[test]
    fn test_profile_lookup_respects_validity() {
        let t0 = t("2025-06-10T12:00:00+02:00");
        let profile = SolarProfile::new(vec![
            SolarForecastPoint {
                start: t0,
                expected_kw: 4.0,
            },
            SolarForecastPoint {
                start: t0 + Duration::minutes(30),
                expected_kw: 2.0,
            },
            SolarForecastPoint {
                start: t0 + Duration::hours(3),
                expected_kw: 5.0,
            },
        ]);
        assert_eq!(profile.kw_at(t0 - Duration::minutes(1)), 0.0);
        assert_eq!(profile.kw_at(t0 + Duration::minutes(15)), 4.0);
        assert_eq!(profile.kw_at(t0 + Duration::minutes(45)), 2.0);
        // Point at +30 min only covers one hour
        assert_eq!(profile.kw_at(t0 + Duration::minutes(100)), 0.0);
        assert_eq!(profile.kw_at(t0 + Duration::hours(3)), 5.0);
    }

    #[test]
    fn test_curve_weights_sum_to_one() {
        let curve = SolarCurve::default();
        let sum: f64 = (0..24).map(|h| curve.hour_fraction(h)).sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert_eq!(curve.hour_fraction(3), 0.0);
    }

    #[test]
    fn test_distribute_applies_confidence_and_baseload() {
        let tz: Tz = "Europe/Stockholm".parse().unwrap();
        let curve = SolarCurve::default();
        let day = NaiveDate::from_ymd_opt(2025, 6, 10).unwrap();
        let points = curve.distribute(day, 40.0, 0, tz, None);
        assert_eq!(points.len(), 15);

        let noon = points
            .iter()
            .find(|p| p.start.hour() == 12)
            .unwrap();
        let expected = 40.0 * curve.hour_fraction(12) * 0.8 - 1.0;
        assert!((noon.expected_kw - expected).abs() < 1e-9);
        // Early hours are swallowed by the baseload
        let five = points.iter().find(|p| p.start.hour() == 5).unwrap();
        assert_eq!(five.expected_kw, 0.0);
    }

    #[test]
    fn test_distribute_masks_outside_daylight() {
        let tz: Tz = "Europe/Stockholm".parse().unwrap();
        let curve = SolarCurve::default();
        let day = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let sunrise = t("2025-03-10T06:30:00+01:00");
        let sunset = t("2025-03-10T18:00:00+01:00");
        let points = curve.distribute(day, 20.0, 0, tz, Some((sunrise, sunset)));
        assert!(points.iter().all(|p| p.start >= sunrise && p.start < sunset));
        assert_eq!(points.first().unwrap().start.hour(), 7);
    }

    #[test]
    fn test_remaining_today_is_renormalized() {
        let tz: Tz = "Europe/Stockholm".parse().unwrap();
        let curve = SolarCurve::new(1.0, 0.0);
        let day = NaiveDate::from_ymd_opt(2025, 6, 10).unwrap();
        let points = curve.distribute(day, 10.0, 15, tz, None);
        let total: f64 = points.iter().map(|p| p.expected_kw).sum();
        assert!((total - 10.0).abs() < 1e-9);
    }
}
