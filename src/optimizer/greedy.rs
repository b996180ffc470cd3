use std::collections::HashSet;

use chrono::{DateTime, Duration, FixedOffset, Timelike};
use ordered_float::OrderedFloat;
use tracing::{debug, info, warn};

use super::throttle::{PowerBudgetState, PowerBudgetThrottle};
use crate::domain::{
    ChargeSchedule, ChargerConfig, PriceSlot, Remediation, RemediationStrategy, ScheduledSlot,
    SlotPass, VehicleState,
};
use crate::error::{ScheduleFault, SchedulerError};

/// Slack when comparing accumulated energy against a requirement.
const ENERGY_EPSILON_KWH: f64 = 1e-9;

/// Throttle and measurements used when tariff mode is enabled.
#[derive(Debug, Clone, Copy)]
pub struct TariffContext<'a> {
    pub throttle: &'a PowerBudgetThrottle,
    pub budget: &'a PowerBudgetState,
}

/// Everything one scheduling run looks at.
#[derive(Debug, Clone)]
pub struct ScheduleRequest<'a> {
    pub now: DateTime<FixedOffset>,
    /// Normalized slots with effective prices, starting at the current slot
    pub slots: &'a [PriceSlot],
    pub vehicle: &'a VehicleState,
    pub tariff: Option<TariffContext<'a>>,
    /// Faults raised while preparing the input, carried onto the schedule
    pub faults: Vec<ScheduleFault>,
}

#[derive(Debug, Default)]
struct Selection {
    slots: Vec<ScheduledSlot>,
    energy_kwh: f64,
}

impl Selection {
    fn satisfies(&self, need_kwh: f64) -> bool {
        self.energy_kwh + ENERGY_EPSILON_KWH >= need_kwh
    }

    fn same_plan(&self, other: &Selection) -> bool {
        self.slots.len() == other.slots.len()
            && self
                .slots
                .iter()
                .zip(&other.slots)
                .all(|(a, b)| a.slot.start == b.slot.start && a.charge_rate_amps == b.charge_rate_amps)
    }
}

/// Two-pass greedy slot selector.
///
/// Pass 1 buys the cheapest slots before the deadline until the guarantee is
/// covered. Pass 2 buys the cheapest remaining slots in the whole horizon
/// toward the target, admitting only slots at or below the price ceiling.
/// Slots are always used in full.
#[derive(Debug, Clone)]
pub struct TwoPassScheduler {
    charger: ChargerConfig,
}

impl TwoPassScheduler {
    pub fn new(charger: ChargerConfig) -> Self {
        Self { charger }
    }

    pub fn charger(&self) -> &ChargerConfig {
        &self.charger
    }

    pub fn schedule(&self, req: ScheduleRequest<'_>) -> Result<ChargeSchedule, SchedulerError> {
        self.charger.validate()?;
        req.vehicle.validate()?;

        let now = req.now;
        let vehicle = req.vehicle;
        let deadline = vehicle.guarantee_deadline;
        let mut faults = req.faults;
        let mut remediation = None;

        if let Some(ctx) = &req.tariff {
            faults.extend(ctx.throttle.sensor_faults(ctx.budget));
        }

        // Pass 1: guarantee
        let mandatory_need = if deadline > now {
            vehicle.energy_for_guarantee()
        } else {
            0.0
        };
        let mut mandatory = Selection::default();
        if mandatory_need > ENERGY_EPSILON_KWH {
            let candidates = sorted_by_price(req.slots.iter().filter(|s| s.start < deadline));
            let (selection, decision) =
                self.select_mandatory(&candidates, mandatory_need, now, deadline, req.tariff.as_ref());
            mandatory = selection;
            remediation = decision;

            if !mandatory.satisfies(mandatory_need) {
                warn!(
                    needed_kwh = mandatory_need,
                    scheduled_kwh = mandatory.energy_kwh,
                    deadline = %deadline,
                    "Guarantee cannot be met before deadline"
                );
                faults.push(ScheduleFault::GuaranteeAtRisk {
                    needed_kwh: mandatory_need,
                    scheduled_kwh: mandatory.energy_kwh,
                });
            }
        }

        // Pass 2: target, from the SOC the mandatory slots leave behind
        let soc_after_mandatory = vehicle.soc_after(vehicle.current_soc, mandatory.energy_kwh, 100.0);
        let optional_need = vehicle.grid_energy_between(soc_after_mandatory, vehicle.target_soc);
        let mut optional = Selection::default();
        if optional_need > ENERGY_EPSILON_KWH {
            let used: HashSet<DateTime<FixedOffset>> =
                mandatory.slots.iter().map(|s| s.slot.start).collect();
            let candidates =
                sorted_by_price(req.slots.iter().filter(|s| !used.contains(&s.start)));
            let ceiling = self
                .charger
                .price_ceiling_enabled()
                .then_some(self.charger.price_ceiling);
            optional = self.select(
                &candidates,
                optional_need,
                SlotPass::Optional,
                ceiling,
                |slot| self.planned_rate(slot, now, req.tariff.as_ref()),
            );
        }

        debug!(
            mandatory_slots = mandatory.slots.len(),
            mandatory_kwh = mandatory.energy_kwh,
            optional_slots = optional.slots.len(),
            optional_kwh = optional.energy_kwh,
            soc_after_mandatory,
            "Slot selection finished"
        );

        let mut slots = mandatory.slots;
        slots.extend(optional.slots);
        let schedule = ChargeSchedule::new(
            now,
            deadline,
            slots,
            vehicle.target_met(),
            soc_after_mandatory,
            faults,
        )
        .with_remediation(remediation);

        info!(
            mode = %schedule.mode,
            slots = schedule.slots.len(),
            energy_kwh = schedule.total_energy_kwh,
            cost = schedule.total_cost,
            avg_price = schedule.energy_weighted_avg_price,
            faults = schedule.faults.len(),
            "Computed charging schedule"
        );
        Ok(schedule)
    }

    /// Pass 1 with tariff handling.
    ///
    /// In tariff mode the pass runs throttled and at full rate; if the
    /// throttle changes the plan the remediation comparison decides which one
    /// is kept. The throttled plan is lifted to the guarantee rate whenever
    /// the throttle alone cannot reach the guarantee by the deadline.
    fn select_mandatory(
        &self,
        candidates: &[&PriceSlot],
        need_kwh: f64,
        now: DateTime<FixedOffset>,
        deadline: DateTime<FixedOffset>,
        tariff: Option<&TariffContext<'_>>,
    ) -> (Selection, Option<Remediation>) {
        let full_rate = self.select(candidates, need_kwh, SlotPass::Mandatory, None, |_| {
            self.charger.max_charge_amps
        });
        let Some(ctx) = tariff else {
            return (full_rate, None);
        };

        let hours_to_deadline = (deadline - now).num_seconds() as f64 / 3600.0;
        let check = ctx.throttle.check_guarantee(need_kwh, hours_to_deadline);
        if check.at_risk {
            debug!(
                required_amps = check.required_amps,
                hours_to_deadline, "Guarantee at risk under throttle, planning override rate"
            );
        }
        let throttled = self.select(candidates, need_kwh, SlotPass::Mandatory, None, |slot| {
            ctx.throttle
                .final_rate(self.planned_rate(slot, now, Some(ctx)), &check)
        });
        if throttled.same_plan(&full_rate) {
            return (throttled, None);
        }

        let expand_cost = throttled
            .satisfies(need_kwh)
            .then(|| expand_cost(&throttled, &full_rate));
        let decision = ctx.throttle.compare_strategies(
            expand_cost,
            ctx.budget,
            ctx.throttle.full_rate_peak_kw(ctx.budget),
        );
        match decision.strategy {
            RemediationStrategy::ExpandSlots => (throttled, Some(decision)),
            RemediationStrategy::ExceedTariff => (full_rate, Some(decision)),
        }
    }

    /// Greedy admission over price-sorted candidates until `need_kwh` is covered.
    fn select<F>(
        &self,
        candidates: &[&PriceSlot],
        need_kwh: f64,
        pass: SlotPass,
        ceiling: Option<f64>,
        rate_for: F,
    ) -> Selection
    where
        F: Fn(&PriceSlot) -> u32,
    {
        let mut selection = Selection::default();
        for slot in candidates {
            if selection.satisfies(need_kwh) {
                break;
            }
            // Sorted ascending, so nothing later passes either
            if ceiling.is_some_and(|c| slot.effective_price > c) {
                break;
            }
            let amps = rate_for(*slot);
            if amps == 0 {
                continue;
            }
            let energy_kwh = self.charger.slot_energy_kwh(amps);
            let pass = if pass == SlotPass::Optional && slot.solar_energy_kwh >= energy_kwh * 0.5 {
                SlotPass::Solar
            } else {
                pass
            };
            selection.energy_kwh += energy_kwh;
            selection.slots.push(ScheduledSlot {
                slot: (*slot).clone(),
                charge_rate_amps: amps,
                energy_kwh,
                pass,
            });
        }
        selection
    }

    /// Planned charge current for a slot. Slots in the current clock hour
    /// share what is left of this hour's budget; later hours start fresh.
    fn planned_rate(
        &self,
        slot: &PriceSlot,
        now: DateTime<FixedOffset>,
        tariff: Option<&TariffContext<'_>>,
    ) -> u32 {
        let Some(ctx) = tariff else {
            return self.charger.max_charge_amps;
        };
        let next_hour = hour_start(now) + Duration::hours(1);
        if slot.start < next_hour {
            let minutes_remaining = (next_hour - now).num_seconds() as f64 / 60.0;
            ctx.throttle.max_charge_rate_now(ctx.budget, minutes_remaining)
        } else {
            ctx.throttle.fresh_hour_rate(ctx.budget)
        }
    }
}

/// Extra cost of the throttled plan: slots it needs beyond the full-rate plan,
/// priced against the cheapest full-rate slot.
fn expand_cost(throttled: &Selection, full_rate: &Selection) -> f64 {
    let cheapest = full_rate
        .slots
        .iter()
        .map(|s| OrderedFloat(s.slot.effective_price))
        .min()
        .map_or(0.0, |p| p.0);
    let in_full: HashSet<DateTime<FixedOffset>> =
        full_rate.slots.iter().map(|s| s.slot.start).collect();
    throttled
        .slots
        .iter()
        .filter(|s| !in_full.contains(&s.slot.start))
        .map(|s| (s.slot.effective_price - cheapest) * s.energy_kwh)
        .sum()
}

fn sorted_by_price<'a>(slots: impl Iterator<Item = &'a PriceSlot>) -> Vec<&'a PriceSlot> {
    let mut sorted: Vec<&PriceSlot> = slots.collect();
    sorted.sort_by_key(|s| (OrderedFloat(s.effective_price), s.start));
    sorted
}

/// Start of the clock hour containing `t`.
pub fn hour_start(t: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    t.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(t)
}
