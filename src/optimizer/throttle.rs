use chrono::{DateTime, Datelike, FixedOffset};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::{ChargerConfig, Measurement, Remediation, RemediationStrategy};
use crate::error::ScheduleFault;

/// Static tariff-mode settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TariffSettings {
    pub hourly_limit_kw: f64,
    pub safety_margin_kw: f64,
    /// Cost per kW of raising the billed peak; `None` disables the comparison.
    pub tariff_rate_per_kw: Option<f64>,
    /// Average power a throttled session is assumed to sustain.
    pub assumed_throttled_kw: f64,
    /// Share of the effective limit assumed consumed when the hour meter is missing.
    pub fallback_budget_used_fraction: f64,
    /// Other household load assumed when its sensor is missing.
    pub fallback_other_load_kw: f64,
}

impl Default for TariffSettings {
    fn default() -> Self {
        Self {
            hourly_limit_kw: 11.0,
            safety_margin_kw: 0.5,
            tariff_rate_per_kw: None,
            assumed_throttled_kw: 5.0,
            fallback_budget_used_fraction: 0.5,
            fallback_other_load_kw: 2.0,
        }
    }
}

/// Measurements taken at the start of a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerBudgetState {
    pub hourly_limit_kw: f64,
    pub safety_margin_kw: f64,
    pub energy_used_this_hour_kwh: Measurement,
    pub other_load_kw: Measurement,
    pub monthly_peak_kw: f64,
}

impl PowerBudgetState {
    /// Limit the hour is planned against. A peak already paid for this
    /// month raises the limit.
    pub fn effective_limit_kw(&self) -> f64 {
        self.hourly_limit_kw.max(self.monthly_peak_kw) - self.safety_margin_kw
    }

    /// Billed tier level before the safety margin.
    pub fn current_tier_kw(&self) -> f64 {
        self.hourly_limit_kw.max(self.monthly_peak_kw)
    }
}

/// Whether throttled charging can still reach the guarantee in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuaranteeCheck {
    pub at_risk: bool,
    /// Average grid power needed to reach the guarantee by the deadline
    pub required_kw: f64,
    /// `required_kw` rounded up to whole amps, within the charger limits
    pub required_amps: u32,
}

/// Highest billed hourly average seen in the current billing month.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MonthlyPeak {
    pub year: i32,
    pub month: u32,
    pub peak_kw: f64,
}

impl MonthlyPeak {
    pub fn new(at: DateTime<FixedOffset>) -> Self {
        Self {
            year: at.year(),
            month: at.month(),
            peak_kw: 0.0,
        }
    }

    /// Fold one completed hour into the ratchet.
    ///
    /// A new billing month starts from that hour's value; within a month the
    /// peak never decreases.
    pub fn observe(self, at: DateTime<FixedOffset>, hourly_avg_kw: f64) -> Self {
        let observed = if hourly_avg_kw.is_finite() {
            hourly_avg_kw.max(0.0)
        } else {
            0.0
        };
        if at.year() != self.year || at.month() != self.month {
            return Self {
                year: at.year(),
                month: at.month(),
                peak_kw: observed,
            };
        }
        Self {
            peak_kw: self.peak_kw.max(observed),
            ..self
        }
    }
}

/// Hourly power-budget throttle for tariff mode.
#[derive(Debug, Clone)]
pub struct PowerBudgetThrottle {
    charger: ChargerConfig,
    settings: TariffSettings,
}

impl PowerBudgetThrottle {
    pub fn new(charger: ChargerConfig, settings: TariffSettings) -> Self {
        Self { charger, settings }
    }

    pub fn settings(&self) -> &TariffSettings {
        &self.settings
    }

    /// Budget state from the current readings and monthly peak.
    pub fn budget_state(
        &self,
        energy_used_this_hour_kwh: Measurement,
        other_load_kw: Measurement,
        monthly_peak_kw: f64,
    ) -> PowerBudgetState {
        PowerBudgetState {
            hourly_limit_kw: self.settings.hourly_limit_kw,
            safety_margin_kw: self.settings.safety_margin_kw,
            energy_used_this_hour_kwh,
            other_load_kw,
            monthly_peak_kw,
        }
    }

    /// Energy consumed so far this hour, assuming a conservative share of the
    /// limit when the meter is unavailable.
    fn energy_used_kwh(&self, state: &PowerBudgetState) -> f64 {
        state.energy_used_this_hour_kwh.value().unwrap_or_else(|| {
            state.effective_limit_kw().max(0.0) * self.settings.fallback_budget_used_fraction
        })
    }

    fn other_load_kw(&self, state: &PowerBudgetState) -> f64 {
        state
            .other_load_kw
            .value()
            .unwrap_or(self.settings.fallback_other_load_kw)
            .max(0.0)
    }

    /// Faults for every reading replaced by a fallback.
    pub fn sensor_faults(&self, state: &PowerBudgetState) -> Vec<ScheduleFault> {
        let mut faults = Vec::new();
        if !state.energy_used_this_hour_kwh.is_available() {
            faults.push(ScheduleFault::SensorUnavailable {
                sensor: "energy_used_this_hour_kwh".to_string(),
            });
        }
        if !state.other_load_kw.is_available() {
            faults.push(ScheduleFault::SensorUnavailable {
                sensor: "other_load_kw".to_string(),
            });
        }
        faults
    }

    /// Floor to whole amps; anything below the charger minimum is 0.
    fn capped_amps(&self, available_kw: f64) -> u32 {
        let amps = (available_kw.max(0.0) * 1000.0 / self.charger.watts_per_amp()).floor();
        if amps < self.charger.min_charge_amps as f64 {
            0
        } else {
            (amps as u32).min(self.charger.max_charge_amps)
        }
    }

    /// Maximum charge current that keeps the rest of this hour under the limit.
    ///
    /// With a minute or less left the hour is over before any draw matters,
    /// so the full rate is allowed.
    pub fn max_charge_rate_now(&self, state: &PowerBudgetState, minutes_remaining: f64) -> u32 {
        if minutes_remaining <= 1.0 {
            return self.charger.max_charge_amps;
        }
        let budget_kwh = state.effective_limit_kw() - self.energy_used_kwh(state);
        if budget_kwh <= 0.0 {
            debug!(budget_kwh, "Hourly budget exhausted");
            return 0;
        }
        let max_avg_kw = budget_kwh / (minutes_remaining / 60.0);
        let available_kw = (max_avg_kw - self.other_load_kw(state)).max(0.0);
        self.capped_amps(available_kw)
    }

    /// Rate for an hour that has not started yet: the whole limit is available.
    pub fn fresh_hour_rate(&self, state: &PowerBudgetState) -> u32 {
        let available_kw = (state.effective_limit_kw() - self.other_load_kw(state)).max(0.0);
        self.capped_amps(available_kw)
    }

    /// Compare what throttled charging delivers with what the guarantee needs.
    ///
    /// `grid_energy_needed_kwh` already includes charging losses.
    pub fn check_guarantee(&self, grid_energy_needed_kwh: f64, hours_remaining: f64) -> GuaranteeCheck {
        if grid_energy_needed_kwh <= 0.0 {
            return GuaranteeCheck {
                at_risk: false,
                required_kw: 0.0,
                required_amps: 0,
            };
        }
        if hours_remaining <= 0.0 {
            return GuaranteeCheck {
                at_risk: true,
                required_kw: self.charger.max_power_kw(),
                required_amps: self.charger.max_charge_amps,
            };
        }
        let required_kw = grid_energy_needed_kwh / hours_remaining;
        let deliverable_kwh = self.settings.assumed_throttled_kw * hours_remaining;
        let amps = (required_kw * 1000.0 / self.charger.watts_per_amp()).ceil() as u32;
        GuaranteeCheck {
            at_risk: grid_energy_needed_kwh > deliverable_kwh,
            required_kw,
            required_amps: amps.clamp(self.charger.min_charge_amps, self.charger.max_charge_amps),
        }
    }

    pub fn is_guarantee_at_risk(&self, grid_energy_needed_kwh: f64, hours_remaining: f64) -> bool {
        self.check_guarantee(grid_energy_needed_kwh, hours_remaining).at_risk
    }

    pub fn minimum_required_rate(&self, grid_energy_needed_kwh: f64, hours_remaining: f64) -> u32 {
        self.check_guarantee(grid_energy_needed_kwh, hours_remaining)
            .required_amps
    }

    /// Guarantee protection overrides the hourly cap.
    pub fn final_rate(&self, rate_now: u32, check: &GuaranteeCheck) -> u32 {
        if check.at_risk {
            rate_now.max(check.required_amps)
        } else {
            rate_now
        }
    }

    /// Choose between buying extra slots under the limit and raising the
    /// billed peak to `new_limit_kw`.
    ///
    /// `expand_cost` is `None` when the extra slots cannot cover the need.
    /// Ties go to expanding; without a tariff rate the guarantee-protecting
    /// exceed path is taken.
    pub fn compare_strategies(
        &self,
        expand_cost: Option<f64>,
        state: &PowerBudgetState,
        new_limit_kw: f64,
    ) -> Remediation {
        let exceed_cost = self
            .settings
            .tariff_rate_per_kw
            .map(|rate| (new_limit_kw - state.current_tier_kw()).max(0.0) * rate);

        let strategy = match (expand_cost, exceed_cost) {
            (Some(expand), Some(exceed)) if expand <= exceed => RemediationStrategy::ExpandSlots,
            _ => RemediationStrategy::ExceedTariff,
        };
        info!(
            ?expand_cost,
            ?exceed_cost,
            new_limit_kw,
            strategy = %strategy,
            "Resolved tariff remediation"
        );
        Remediation {
            strategy,
            expand_cost,
            exceed_cost,
            new_limit_kw,
        }
    }

    /// Hourly average the house would reach when charging at full rate.
    pub fn full_rate_peak_kw(&self, state: &PowerBudgetState) -> f64 {
        self.other_load_kw(state) + self.charger.max_power_kw()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn charger() -> ChargerConfig {
        ChargerConfig {
            min_charge_amps: 6,
            max_charge_amps: 16,
            voltage: 230.0,
            phases: 3,
            price_ceiling: 0.0,
        }
    }

    fn throttle(rate: Option<f64>) -> PowerBudgetThrottle {
        PowerBudgetThrottle::new(
            charger(),
            TariffSettings {
                hourly_limit_kw: 11.0,
                safety_margin_kw: 1.0,
                tariff_rate_per_kw: rate,
                assumed_throttled_kw: 5.0,
                fallback_budget_used_fraction: 0.5,
                fallback_other_load_kw: 2.0,
            },
        )
    }

    fn state(used: f64, other: f64) -> PowerBudgetState {
        throttle(None).budget_state(Measurement::Available(used), Measurement::Available(other), 0.0)
    }

    #[test]
    fn test_budget_exhausted_gives_zero() {
        let t = throttle(None);
        assert_eq!(t.max_charge_rate_now(&state(10.0, 0.5), 50.0), 0);
        assert_eq!(t.max_charge_rate_now(&state(12.0, 0.5), 50.0), 0);
    }

    #[test]
    fn test_last_minute_allows_full_rate() {
        let t = throttle(None);
        assert_eq!(t.max_charge_rate_now(&state(10.0, 0.5), 1.0), 16);
    }

    #[rstest]
    // 10 kWh left over 60 min, 1 kW other load: 9 kW, 13.04 A floored
    #[case(0.0, 1.0, 60.0, 13)]
    // 5 kWh left over 30 min: 10 kW average, 9 kW for the car
    #[case(5.0, 1.0, 30.0, 13)]
    // 8 kWh used, 2 kWh left over 30 min: 4 kW, 3 kW for the car, under min
    #[case(8.0, 1.0, 30.0, 0)]
    // Plenty of budget: capped at max
    #[case(0.0, 0.0, 15.0, 16)]
    fn test_max_charge_rate_now(
        #[case] used: f64,
        #[case] other: f64,
        #[case] minutes: f64,
        #[case] expected: u32,
    ) {
        assert_eq!(throttle(None).max_charge_rate_now(&state(used, other), minutes), expected);
    }

    #[test]
    fn test_monthly_peak_raises_limit() {
        let t = throttle(None);
        let mut s = state(0.0, 1.0);
        s.monthly_peak_kw = 14.0;
        assert!((s.effective_limit_kw() - 13.0).abs() < 1e-9);
        // 12 kW for the car over a fresh hour, capped at 16 A (11.04 kW)
        assert_eq!(t.fresh_hour_rate(&s), 16);
    }

    #[test]
    fn test_unavailable_sensors_use_fallbacks() {
        let t = throttle(None);
        let s = t.budget_state(Measurement::Unavailable, Measurement::Unavailable, 0.0);
        // Half of 10 kWh assumed used, 2 kW other load, 60 minutes: 3 kW
        assert_eq!(t.max_charge_rate_now(&s, 60.0), 0);
        assert_eq!(t.sensor_faults(&s).len(), 2);
        assert!(t.sensor_faults(&state(0.0, 0.0)).is_empty());
    }

    #[test]
    fn test_guarantee_check() {
        let t = throttle(None);
        // 20 kWh in 2 hours needs 10 kW, throttled delivers 10 kWh
        let check = t.check_guarantee(20.0, 2.0);
        assert!(check.at_risk);
        assert!((check.required_kw - 10.0).abs() < 1e-9);
        assert_eq!(check.required_amps, 15);
        assert_eq!(t.final_rate(0, &check), 15);
        assert_eq!(t.final_rate(16, &check), 16);

        let relaxed = t.check_guarantee(5.0, 8.0);
        assert!(!relaxed.at_risk);
        assert_eq!(t.final_rate(0, &relaxed), 0);

        assert!(t.is_guarantee_at_risk(1.0, 0.0));
        assert_eq!(t.minimum_required_rate(1.0, 0.0), 16);
        assert!(!t.is_guarantee_at_risk(0.0, 0.0));
    }

    #[test]
    fn test_compare_strategies() {
        let s = state(0.0, 1.0);
        // Raising the tier from 11 to 12.04 kW at 10/kW costs 10.4
        let exceed = throttle(Some(10.0)).compare_strategies(Some(3.0), &s, 12.04);
        assert_eq!(exceed.strategy, RemediationStrategy::ExpandSlots);
        let costly = throttle(Some(10.0)).compare_strategies(Some(20.0), &s, 12.04);
        assert_eq!(costly.strategy, RemediationStrategy::ExceedTariff);
        let tie = throttle(Some(10.0)).compare_strategies(Some(10.0), &s, 12.0);
        assert_eq!(tie.strategy, RemediationStrategy::ExpandSlots);
        let impossible = throttle(Some(10.0)).compare_strategies(None, &s, 12.0);
        assert_eq!(impossible.strategy, RemediationStrategy::ExceedTariff);
        let no_rate = throttle(None).compare_strategies(Some(0.0), &s, 12.0);
        assert_eq!(no_rate.strategy, RemediationStrategy::ExceedTariff);
        assert_eq!(no_rate.exceed_cost, None);
    }

    #[test]
    fn test_monthly_peak_ratchet() {
        let jan = DateTime::parse_from_rfc3339("2025-01-10T10:00:00+01:00").unwrap();
        let feb = DateTime::parse_from_rfc3339("2025-02-01T00:00:00+01:00").unwrap();
        let peak = MonthlyPeak::new(jan).observe(jan, 9.0).observe(jan, 7.0);
        assert_eq!(peak.peak_kw, 9.0);
        let peak = peak.observe(feb, 4.0);
        assert_eq!(peak.peak_kw, 4.0);
        assert_eq!(peak.month, 2);
        assert_eq!(peak.observe(feb, f64::NAN).peak_kw, 4.0);
    }

    proptest! {
        #[test]
        fn prop_rate_within_bounds(
            used in -5.0f64..30.0,
            other in 0.0f64..15.0,
            minutes in 0.0f64..60.0,
        ) {
            let t = throttle(None);
            let s = state(used, other);
            let rate = t.max_charge_rate_now(&s, minutes);
            prop_assert!(rate <= 16);
            prop_assert!(rate == 0 || rate >= 6);
            if minutes > 1.0 && s.effective_limit_kw() - used <= 0.0 {
                prop_assert_eq!(rate, 0);
            }
        }

        #[test]
        fn prop_final_rate_honors_requirement(
            needed in 0.1f64..80.0,
            hours in 0.1f64..24.0,
            now_rate in 0u32..=16,
        ) {
            let t = throttle(None);
            let check = t.check_guarantee(needed, hours);
            let rate = t.final_rate(now_rate, &check);
            if check.at_risk {
                prop_assert!(rate >= check.required_amps);
            }
            prop_assert!(rate >= now_rate);
        }
    }
}
