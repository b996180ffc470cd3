use chrono::{DateTime, Duration, FixedOffset};
use tracing::debug;

use crate::domain::ChargerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolarMode {
    /// Surplus covers the charge power on its own
    Pure,
    /// Minimum current, topped up from the grid while prices are low
    Blended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolarAction {
    Charge { amps: u32, mode: SolarMode },
    Stop,
    /// Inside the change interval; keep whatever is running
    NoChange,
}

/// Prices in effect for the current slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceNow {
    pub buy: f64,
    pub sell: f64,
    /// Average buy price of the current day
    pub daily_average: f64,
}

/// Three-tier opportunistic solar charging outside scheduled slots.
#[derive(Debug, Clone)]
pub struct SolarOpportunism {
    charger: ChargerConfig,
    pub pure_threshold_w: f64,
    pub blended_min_w: f64,
    pub blended_price_factor: f64,
    pub min_change_interval: Duration,
}

impl SolarOpportunism {
    pub fn new(
        charger: ChargerConfig,
        pure_threshold_w: f64,
        blended_min_w: f64,
        blended_price_factor: f64,
        min_change_interval_secs: u64,
    ) -> Self {
        Self {
            charger,
            pure_threshold_w,
            blended_min_w,
            blended_price_factor,
            min_change_interval: Duration::seconds(min_change_interval_secs as i64),
        }
    }

    /// Price per kWh of charging at minimum power with `surplus_w` of solar.
    ///
    /// The solar share costs the forgone export credit, the rest the buy price.
    pub fn blended_price(&self, surplus_w: f64, buy: f64, sell: f64) -> f64 {
        let min_power_w = self.charger.min_power_kw() * 1000.0;
        let sell = sell.max(0.0);
        if min_power_w <= 0.0 || surplus_w >= min_power_w {
            return sell;
        }
        let solar_fraction = surplus_w.max(0.0) / min_power_w;
        solar_fraction * sell + (1.0 - solar_fraction) * buy
    }

    /// Whole amps the surplus supports, within the charger limits.
    pub fn amps_for_surplus(&self, surplus_w: f64) -> u32 {
        let amps = (surplus_w.max(0.0) / self.charger.watts_per_amp()).floor() as u32;
        amps.clamp(self.charger.min_charge_amps, self.charger.max_charge_amps)
    }

    pub fn change_allowed(&self, now: DateTime<FixedOffset>, last_change: Option<DateTime<FixedOffset>>) -> bool {
        last_change.map_or(true, |last| now - last >= self.min_change_interval)
    }

    pub fn evaluate(
        &self,
        surplus_w: f64,
        prices: Option<PriceNow>,
        now: DateTime<FixedOffset>,
        last_change: Option<DateTime<FixedOffset>>,
    ) -> SolarAction {
        if !self.change_allowed(now, last_change) {
            return SolarAction::NoChange;
        }

        if surplus_w >= self.pure_threshold_w {
            return SolarAction::Charge {
                amps: self.amps_for_surplus(surplus_w),
                mode: SolarMode::Pure,
            };
        }

        if surplus_w >= self.blended_min_w {
            // No price data: stay conservative
            let Some(p) = prices else {
                return SolarAction::Stop;
            };
            let blended = self.blended_price(surplus_w, p.buy, p.sell);
            let threshold = p.daily_average * self.blended_price_factor;
            debug!(surplus_w, blended, threshold, "Evaluated blended solar price");
            if blended < threshold {
                return SolarAction::Charge {
                    amps: self.charger.min_charge_amps,
                    mode: SolarMode::Blended,
                };
            }
        }

        SolarAction::Stop
    }
}
