use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Metered totals for one finished clock hour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedHour {
    pub start: DateTime<FixedOffset>,
    pub buy_price: f64,
    /// Net grid import of the whole site; negative while exporting
    pub grid_import_kwh: f64,
    /// Energy delivered to the vehicle
    pub charger_kwh: f64,
}

impl CompletedHour {
    /// Average grid draw of the hour, the quantity the tariff bills on.
    pub fn average_import_kw(&self) -> f64 {
        self.grid_import_kwh.max(0.0)
    }
}

/// Running charging cost, with and without the solar contribution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostTotals {
    /// Cost had every charged kWh been bought
    pub without_solar: f64,
    /// Cost of the charged kWh that actually came from the grid
    pub with_solar: f64,
}

impl CostTotals {
    pub fn accumulate(self, hour: &CompletedHour) -> Self {
        let charger_kwh = hour.charger_kwh.max(0.0);
        let from_grid = charger_kwh.min(hour.grid_import_kwh.max(0.0));
        Self {
            without_solar: self.without_solar + hour.buy_price * charger_kwh,
            with_solar: self.with_solar + hour.buy_price * from_grid,
        }
    }

    pub fn solar_savings(&self) -> f64 {
        self.without_solar - self.with_solar
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hour(grid_import_kwh: f64, charger_kwh: f64) -> CompletedHour {
        CompletedHour {
            start: DateTime::parse_from_rfc3339("2025-06-10T12:00:00+02:00").unwrap(),
            buy_price: 0.5,
            grid_import_kwh,
            charger_kwh,
        }
    }

    #[test]
    fn test_accumulate_grid_only() {
        let totals = CostTotals::default().accumulate(&hour(10.0, 8.0));
        assert!((totals.without_solar - 4.0).abs() < 1e-9);
        assert!((totals.with_solar - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_accumulate_partly_solar() {
        let totals = CostTotals::default()
            .accumulate(&hour(3.0, 8.0))
            .accumulate(&hour(-2.0, 4.0));
        assert!((totals.without_solar - 6.0).abs() < 1e-9);
        assert!((totals.with_solar - 1.5).abs() < 1e-9);
        assert!((totals.solar_savings() - 4.5).abs() < 1e-9);
    }
}
