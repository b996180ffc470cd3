//! Site data collaborators: price/solar forecasts and live meter readings.

pub mod file;
pub mod http;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{Measurement, RawPriceEntry, SolarForecastPoint};
use crate::optimizer::CompletedHour;

pub use file::FileDataProvider;
pub use http::HttpDataProvider;

/// Daily solar production totals, used when no hourly forecast is published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolarDailyTotals {
    pub remaining_today_kwh: f64,
    pub tomorrow_kwh: f64,
}

/// Forecast inputs for one scheduling cycle. Any part may be partial.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastSnapshot {
    pub prices: Vec<RawPriceEntry>,
    #[serde(default)]
    pub sell_prices: Vec<RawPriceEntry>,
    #[serde(default)]
    pub solar: Vec<SolarForecastPoint>,
    #[serde(default)]
    pub solar_daily: Option<SolarDailyTotals>,
}

/// Live site measurements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SiteReadings {
    /// Net grid power; negative while exporting
    #[serde(default)]
    pub grid_power_w: Measurement,
    #[serde(default)]
    pub energy_used_this_hour_kwh: Measurement,
    #[serde(default)]
    pub other_load_kw: Measurement,
    /// Totals of the last finished hour, once per hour
    #[serde(default)]
    pub completed_hour: Option<CompletedHour>,
}

impl SiteReadings {
    /// Power currently exported to the grid (W), 0 when importing or unknown.
    pub fn export_w(&self) -> f64 {
        self.grid_power_w.value().map_or(0.0, |w| (-w).max(0.0))
    }
}

/// Source of forecasts and readings. Data is fetched before the scheduler
/// runs; the scheduler itself never performs I/O.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SiteDataProvider: Send + Sync {
    async fn forecast(&self) -> Result<ForecastSnapshot>;
    async fn readings(&self) -> Result<SiteReadings>;
}
