use std::collections::HashMap;

use chrono::{DateTime, FixedOffset};
use tracing::debug;

use super::solar::SolarProfile;
use crate::domain::{PriceSlot, SLOT_HOURS};

/// How the export credit of a slot is determined when no sell series covers it.
#[derive(Debug, Clone, PartialEq)]
pub struct SellPricePolicy {
    /// Flat export price per kWh, used when no time-varying price exists.
    pub flat: Option<f64>,
    /// Share of the buy price assumed as export credit as a last resort.
    pub fraction_of_buy: f64,
}

impl Default for SellPricePolicy {
    fn default() -> Self {
        Self {
            flat: None,
            fraction_of_buy: 0.5,
        }
    }
}

/// Solar-adjusted price of charging from one slot.
///
/// Solar power used for charging is power not exported, so each kWh of it
/// costs the forgone sell credit rather than the buy price. The result is
/// clamped to `[0, raw_price]`; a non-positive raw price is returned as is.
pub fn effective_price(raw_price: f64, sell_price: f64, solar_kw: f64, assumed_charge_kw: f64) -> f64 {
    if raw_price <= 0.0 || assumed_charge_kw <= 0.0 {
        return raw_price;
    }
    let solar_used_kw = solar_kw.max(0.0).min(assumed_charge_kw);
    let forgone_credit = sell_price.max(0.0) * solar_used_kw;
    (raw_price - forgone_credit / assumed_charge_kw).clamp(0.0, raw_price)
}

/// Computes effective prices for a normalized slot sequence.
#[derive(Debug, Clone)]
pub struct EffectivePriceCalculator {
    assumed_charge_kw: f64,
    policy: SellPricePolicy,
    sell_series: HashMap<DateTime<FixedOffset>, f64>,
}

impl EffectivePriceCalculator {
    pub fn new(assumed_charge_kw: f64, policy: SellPricePolicy) -> Self {
        Self {
            assumed_charge_kw,
            policy,
            sell_series: HashMap::new(),
        }
    }

    /// Time-varying export prices, already normalized to 15-minute slots.
    pub fn with_sell_series(mut self, sell_slots: &[PriceSlot]) -> Self {
        self.sell_series = sell_slots.iter().map(|s| (s.start, s.raw_price)).collect();
        self
    }

    /// Export credit for a slot: time-varying, then flat, then a share of the
    /// buy price. Negative credits count as zero.
    pub fn sell_price_for(&self, slot: &PriceSlot) -> f64 {
        let price = self
            .sell_series
            .get(&slot.start)
            .copied()
            .or(self.policy.flat)
            .unwrap_or(slot.raw_price * self.policy.fraction_of_buy);
        price.max(0.0)
    }

    pub fn apply(&self, slots: &mut [PriceSlot], solar: &SolarProfile) {
        let mut discounted = 0usize;
        for slot in slots.iter_mut() {
            let solar_kw = solar.kw_at(slot.start);
            slot.sell_price = self.sell_price_for(slot);
            slot.solar_forecast_kw = solar_kw;
            slot.solar_energy_kwh = solar_kw.min(self.assumed_charge_kw) * SLOT_HOURS;
            slot.effective_price =
                effective_price(slot.raw_price, slot.sell_price, solar_kw, self.assumed_charge_kw);
            if slot.effective_price < slot.raw_price {
                discounted += 1;
            }
        }
        debug!(
            slots = slots.len(),
            discounted,
            assumed_charge_kw = self.assumed_charge_kw,
            "Applied solar-adjusted prices"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SolarForecastPoint;
    use chrono::Duration;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case(0.20, 0.10, 0.0, 8.97, 0.20)]
    // Full solar coverage: pay only the forgone export credit
    #[case(0.20, 0.10, 10.0, 8.97, 0.10)]
    // Half coverage
    #[case(0.20, 0.10, 4.485, 8.97, 0.15)]
    // Sell above buy clamps to zero
    #[case(0.10, 0.30, 10.0, 8.97, 0.0)]
    // Negative raw price is kept
    #[case(-0.05, 0.10, 10.0, 8.97, -0.05)]
    fn test_effective_price(
        #[case] raw: f64,
        #[case] sell: f64,
        #[case] solar: f64,
        #[case] assumed: f64,
        #[case] expected: f64,
    ) {
        assert!((effective_price(raw, sell, solar, assumed) - expected).abs() < 1e-9);
    }

    fn slot(start: DateTime<FixedOffset>, raw: f64) -> PriceSlot {
        PriceSlot::new(start, start + Duration::minutes(15), raw)
    }

    #[test]
    fn test_sell_price_resolution_order() {
        let t0 = DateTime::parse_from_rfc3339("2025-06-10T12:00:00+02:00").unwrap();
        let series = vec![slot(t0, 0.07)];

        let calc = EffectivePriceCalculator::new(8.97, SellPricePolicy::default())
            .with_sell_series(&series);
        assert_eq!(calc.sell_price_for(&slot(t0, 0.20)), 0.07);
        // Not in series, no flat price: half the buy price
        let later = slot(t0 + Duration::minutes(15), 0.20);
        assert!((calc.sell_price_for(&later) - 0.10).abs() < 1e-9);

        let flat = EffectivePriceCalculator::new(
            8.97,
            SellPricePolicy {
                flat: Some(0.04),
                fraction_of_buy: 0.5,
            },
        );
        assert_eq!(flat.sell_price_for(&later), 0.04);

        let negative = EffectivePriceCalculator::new(
            8.97,
            SellPricePolicy {
                flat: Some(-0.02),
                fraction_of_buy: 0.5,
            },
        );
        assert_eq!(negative.sell_price_for(&later), 0.0);
    }

    #[test]
    fn test_apply_fills_solar_fields() {
        let t0 = DateTime::parse_from_rfc3339("2025-06-10T12:00:00+02:00").unwrap();
        let mut slots = vec![slot(t0, 0.20), slot(t0 + Duration::minutes(15), 0.20)];
        let solar = SolarProfile::new(vec![SolarForecastPoint {
            start: t0,
            expected_kw: 12.0,
        }]);
        EffectivePriceCalculator::new(8.0, SellPricePolicy::default()).apply(&mut slots, &solar);
        assert_eq!(slots[0].solar_forecast_kw, 12.0);
        assert!((slots[0].solar_energy_kwh - 2.0).abs() < 1e-9);
        assert!((slots[0].effective_price - 0.10).abs() < 1e-9);
        assert!(slots.iter().all(|s| s.effective_price <= s.raw_price));
    }

    proptest! {
        #[test]
        fn prop_more_solar_never_raises_price(
            raw in 0.0f64..5.0,
            sell in -1.0f64..5.0,
            solar_a in 0.0f64..30.0,
            extra in 0.0f64..30.0,
            assumed in 1.0f64..25.0,
        ) {
            let low = effective_price(raw, sell, solar_a, assumed);
            let high = effective_price(raw, sell, solar_a + extra, assumed);
            prop_assert!(high <= low + 1e-12);
            prop_assert!(low <= raw && low >= 0.0);
        }
    }
}
