use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use super::price::PriceSlot;
use crate::error::ScheduleFault;

/// Slots with more solar energy than this count as solar slots.
pub const SOLAR_SLOT_MIN_KWH: f64 = 0.1;

/// Which selection pass admitted a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SlotPass {
    /// Needed to reach the guarantee by the deadline
    Mandatory,
    /// Cost-optimal charging toward the target
    Optional,
    /// Optional slot mostly covered by forecast solar
    Solar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ScheduleMode {
    Complete,
    Idle,
    ScheduledMandatory,
    ScheduledOptional,
    ScheduledMandatoryOptional,
}

/// How a tariff-mode shortfall was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RemediationStrategy {
    /// Stay under the hourly limit and buy extra slots.
    ExpandSlots,
    /// Charge above the limit and accept the higher tier.
    ExceedTariff,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Remediation {
    pub strategy: RemediationStrategy,
    /// Extra energy cost of staying under the limit; `None` when capacity is insufficient.
    pub expand_cost: Option<f64>,
    /// Tier cost of exceeding; `None` when no tariff rate is configured.
    pub exceed_cost: Option<f64>,
    pub new_limit_kw: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledSlot {
    pub slot: PriceSlot,
    pub charge_rate_amps: u32,
    pub energy_kwh: f64,
    pub pass: SlotPass,
}

impl ScheduledSlot {
    pub fn cost(&self) -> f64 {
        self.energy_kwh * self.slot.effective_price
    }

    pub fn is_solar(&self) -> bool {
        self.slot.solar_energy_kwh > SOLAR_SLOT_MIN_KWH
    }
}

/// Result of one scheduling cycle. Replaced wholesale on every cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeSchedule {
    pub id: Uuid,
    pub computed_at: DateTime<FixedOffset>,
    pub deadline: DateTime<FixedOffset>,
    pub mode: ScheduleMode,
    /// Chronological, each price slot at most once
    pub slots: Vec<ScheduledSlot>,
    pub total_energy_kwh: f64,
    pub total_cost: f64,
    pub energy_weighted_avg_price: f64,
    /// Projected SOC once the mandatory slots have run
    pub soc_after_mandatory: f64,
    pub faults: Vec<ScheduleFault>,
    pub guarantee_degraded: bool,
    pub remediation: Option<Remediation>,
}

impl ChargeSchedule {
    /// Build a schedule from selected slots, sorting them and computing aggregates.
    pub fn new(
        computed_at: DateTime<FixedOffset>,
        deadline: DateTime<FixedOffset>,
        mut slots: Vec<ScheduledSlot>,
        target_met: bool,
        soc_after_mandatory: f64,
        faults: Vec<ScheduleFault>,
    ) -> Self {
        slots.sort_by_key(|s| s.slot.start);

        let total_energy_kwh: f64 = slots.iter().map(|s| s.energy_kwh).sum();
        let total_cost: f64 = slots.iter().map(ScheduledSlot::cost).sum();
        let energy_weighted_avg_price = if total_energy_kwh > 0.0 {
            total_cost / total_energy_kwh
        } else {
            0.0
        };

        let has_mandatory = slots.iter().any(|s| s.pass == SlotPass::Mandatory);
        let has_optional = slots.iter().any(|s| s.pass != SlotPass::Mandatory);
        let mode = match (has_mandatory, has_optional) {
            (true, true) => ScheduleMode::ScheduledMandatoryOptional,
            (true, false) => ScheduleMode::ScheduledMandatory,
            (false, true) => ScheduleMode::ScheduledOptional,
            (false, false) if target_met => ScheduleMode::Complete,
            (false, false) => ScheduleMode::Idle,
        };

        let guarantee_degraded = faults
            .iter()
            .any(|f| matches!(f, ScheduleFault::GuaranteeAtRisk { .. }));

        Self {
            id: Uuid::new_v4(),
            computed_at,
            deadline,
            mode,
            slots,
            total_energy_kwh,
            total_cost,
            energy_weighted_avg_price,
            soc_after_mandatory,
            faults,
            guarantee_degraded,
            remediation: None,
        }
    }

    /// Placeholder published before the first cycle completes.
    pub fn empty(now: DateTime<FixedOffset>) -> Self {
        Self::new(now, now, Vec::new(), false, 0.0, Vec::new())
    }

    pub fn with_remediation(mut self, remediation: Option<Remediation>) -> Self {
        self.remediation = remediation;
        self
    }

    /// Scheduled slot covering `t`, if any.
    pub fn slot_at(&self, t: DateTime<FixedOffset>) -> Option<&ScheduledSlot> {
        self.slots.iter().find(|s| s.slot.contains(t))
    }

    /// Start of the next slot that has not finished yet.
    pub fn next_slot_start(&self, now: DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
        self.slots
            .iter()
            .find(|s| s.slot.end > now)
            .map(|s| s.slot.start)
    }

    pub fn schedule_end(&self) -> Option<DateTime<FixedOffset>> {
        self.slots.last().map(|s| s.slot.end)
    }

    pub fn solar_slot_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_solar()).count()
    }

    pub fn mandatory_energy_kwh(&self) -> f64 {
        self.slots
            .iter()
            .filter(|s| s.pass == SlotPass::Mandatory)
            .map(|s| s.energy_kwh)
            .sum()
    }

    pub fn view(&self, now: DateTime<FixedOffset>) -> ScheduleView {
        ScheduleView {
            id: self.id,
            status: self.mode,
            computed_at: self.computed_at,
            deadline: self.deadline,
            schedule: self
                .slots
                .iter()
                .map(|s| ScheduleEntry {
                    start: s.slot.start,
                    end: s.slot.end,
                    charge_rate_amps: s.charge_rate_amps,
                    energy_kwh: s.energy_kwh,
                    pass: s.pass,
                    price: s.slot.effective_price,
                    solar_energy_kwh: s.slot.solar_energy_kwh,
                })
                .collect(),
            avg_price: self.energy_weighted_avg_price,
            estimated_cost: self.total_cost,
            total_energy_kwh: self.total_energy_kwh,
            slot_count: self.slots.len(),
            solar_slot_count: self.solar_slot_count(),
            next_slot_start: self.next_slot_start(now),
            schedule_end: self.schedule_end(),
            guarantee_degraded: self.guarantee_degraded,
            faults: self.faults.clone(),
            remediation: self.remediation.clone(),
        }
    }
}

/// Published schedule surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleView {
    pub id: Uuid,
    pub status: ScheduleMode,
    pub computed_at: DateTime<FixedOffset>,
    pub deadline: DateTime<FixedOffset>,
    pub schedule: Vec<ScheduleEntry>,
    pub avg_price: f64,
    pub estimated_cost: f64,
    pub total_energy_kwh: f64,
    pub slot_count: usize,
    pub solar_slot_count: usize,
    pub next_slot_start: Option<DateTime<FixedOffset>>,
    pub schedule_end: Option<DateTime<FixedOffset>>,
    pub guarantee_degraded: bool,
    pub faults: Vec<ScheduleFault>,
    pub remediation: Option<Remediation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub charge_rate_amps: u32,
    pub energy_kwh: f64,
    pub pass: SlotPass,
    pub price: f64,
    pub solar_energy_kwh: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn slot_at(start: DateTime<FixedOffset>, offset_min: i64, price: f64, pass: SlotPass) -> ScheduledSlot {
        let s = start + Duration::minutes(offset_min);
        ScheduledSlot {
            slot: PriceSlot::new(s, s + Duration::minutes(15), price),
            charge_rate_amps: 13,
            energy_kwh: 1.0,
            pass,
        }
    }

    fn base() -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339("2025-01-10T22:00:00+01:00").unwrap()
    }

    #[test]
    fn test_aggregates_and_ordering() {
        let t0 = base();
        let schedule = ChargeSchedule::new(
            t0,
            t0 + Duration::hours(9),
            vec![
                slot_at(t0, 30, 0.10, SlotPass::Optional),
                slot_at(t0, 0, 0.05, SlotPass::Mandatory),
            ],
            false,
            50.0,
            Vec::new(),
        );
        assert_eq!(schedule.slots[0].slot.start, t0);
        assert!((schedule.total_energy_kwh - 2.0).abs() < 1e-9);
        assert!((schedule.total_cost - 0.15).abs() < 1e-9);
        assert!((schedule.energy_weighted_avg_price - 0.075).abs() < 1e-9);
        assert_eq!(schedule.mode, ScheduleMode::ScheduledMandatoryOptional);
        assert_eq!(schedule.schedule_end(), Some(t0 + Duration::minutes(45)));
    }

    #[test]
    fn test_mode_without_slots() {
        let t0 = base();
        let done = ChargeSchedule::new(t0, t0, Vec::new(), true, 80.0, Vec::new());
        assert_eq!(done.mode, ScheduleMode::Complete);
        let idle = ChargeSchedule::empty(t0);
        assert_eq!(idle.mode, ScheduleMode::Idle);
        assert_eq!(idle.energy_weighted_avg_price, 0.0);
    }

    #[test]
    fn test_slot_lookup_and_next_start() {
        let t0 = base();
        let schedule = ChargeSchedule::new(
            t0,
            t0 + Duration::hours(9),
            vec![
                slot_at(t0, 0, 0.05, SlotPass::Mandatory),
                slot_at(t0, 60, 0.07, SlotPass::Mandatory),
            ],
            false,
            50.0,
            Vec::new(),
        );
        assert!(schedule.slot_at(t0 + Duration::minutes(5)).is_some());
        assert!(schedule.slot_at(t0 + Duration::minutes(20)).is_none());
        assert_eq!(
            schedule.next_slot_start(t0 + Duration::minutes(20)),
            Some(t0 + Duration::minutes(60))
        );
        assert_eq!(schedule.next_slot_start(t0 + Duration::hours(2)), None);
    }

    #[test]
    fn test_guarantee_degraded_flag() {
        let t0 = base();
        let schedule = ChargeSchedule::new(
            t0,
            t0,
            Vec::new(),
            false,
            30.0,
            vec![ScheduleFault::GuaranteeAtRisk {
                needed_kwh: 10.0,
                scheduled_kwh: 0.0,
            }],
        );
        assert!(schedule.guarantee_degraded);
        let view = schedule.view(t0);
        assert!(view.guarantee_degraded);
        assert_eq!(view.slot_count, 0);
    }

    #[test]
    fn test_pass_string_forms() {
        assert_eq!(SlotPass::Mandatory.to_string(), "mandatory");
        assert_eq!(
            ScheduleMode::ScheduledMandatoryOptional.to_string(),
            "scheduled_mandatory_optional"
        );
        let json = serde_json::to_string(&SlotPass::Solar).unwrap();
        assert_eq!(json, "\"solar\"");
    }
}
