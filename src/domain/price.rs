use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use super::types::SLOT_HOURS;

/// One entry of a raw price forecast, as published by the market feed.
///
/// Entries may be hourly or quarter-hourly, and a single feed may mix both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPriceEntry {
    pub start: DateTime<FixedOffset>,
    pub duration_minutes: u32,
    pub price: f64,
}

/// Expected solar generation starting at `start`.
///
/// A point covers the time up to the next point, or at most one hour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolarForecastPoint {
    pub start: DateTime<FixedOffset>,
    pub expected_kw: f64,
}

/// Atomic 15-minute scheduling unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSlot {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    /// Buy-side spot price per kWh.
    pub raw_price: f64,
    /// Credit per kWh for exported solar during this slot.
    pub sell_price: f64,
    /// Expected solar power available for charging (0 at night).
    pub solar_forecast_kw: f64,
    /// Raw price adjusted for the forgone export credit. Never above `raw_price`.
    pub effective_price: f64,
    /// Energy of this slot covered by solar at the assumed charge power.
    pub solar_energy_kwh: f64,
}

impl PriceSlot {
    /// A slot with no solar information yet; effective price equals raw price.
    pub fn new(start: DateTime<FixedOffset>, end: DateTime<FixedOffset>, raw_price: f64) -> Self {
        Self {
            start,
            end,
            raw_price,
            sell_price: 0.0,
            solar_forecast_kw: 0.0,
            effective_price: raw_price,
            solar_energy_kwh: 0.0,
        }
    }

    pub fn contains(&self, t: DateTime<FixedOffset>) -> bool {
        t >= self.start && t < self.end
    }

    /// Energy delivered in this slot at a constant power.
    pub fn energy_at_kw(&self, power_kw: f64) -> f64 {
        power_kw.max(0.0) * SLOT_HOURS
    }
}
