use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::info;

use super::solar::{SolarAction, SolarMode};
use crate::domain::{ChargeSchedule, ChargerControl, ChargerState, ScheduleMode};

/// Scheduled slots with more solar than this are reported as solar charging.
const SOLAR_STATUS_MIN_KWH: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChargingStatus {
    Idle,
    WaitingForSlot,
    GridCharging,
    SolarCharging,
    Paused,
    Complete,
    Error,
}

impl ChargingStatus {
    /// Numeric status code exposed to dashboards.
    pub fn code(&self) -> i8 {
        match self {
            Self::Idle => 0,
            Self::WaitingForSlot => 1,
            Self::GridCharging => 2,
            Self::SolarCharging => 3,
            Self::Paused => 4,
            Self::Complete => 5,
            Self::Error => -1,
        }
    }
}

/// Who started the charging session currently running, if anyone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionOrigin {
    /// Nothing started by the controller; a running session is manual
    #[default]
    None,
    Scheduled,
    Solar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargerCommand {
    Start { amps: u32 },
    Adjust { amps: u32 },
    Stop,
    Hold,
}

/// Inputs of one executor tick.
#[derive(Debug, Clone)]
pub struct TickContext<'a> {
    pub now: DateTime<FixedOffset>,
    pub schedule: &'a ChargeSchedule,
    pub charger: &'a ChargerState,
    pub origin: SessionOrigin,
    /// SOC at which charging is complete (%)
    pub soc_limit: f64,
    /// Live tariff cap for a scheduled slot; `None` outside tariff mode
    pub live_cap: Option<u32>,
    /// Opportunistic solar decision, evaluated only outside scheduled slots
    pub solar: Option<SolarAction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub command: ChargerCommand,
    pub status: ChargingStatus,
    pub origin: SessionOrigin,
    pub reason: &'static str,
}

impl Decision {
    fn new(command: ChargerCommand, status: ChargingStatus, origin: SessionOrigin, reason: &'static str) -> Self {
        Self {
            command,
            status,
            origin,
            reason,
        }
    }
}

/// Decide what to do with the charger this tick.
///
/// Sessions the controller did not start are never stopped or adjusted.
pub fn decide(ctx: &TickContext<'_>) -> Decision {
    use ChargerCommand::*;

    let charger = ctx.charger;
    let ours = ctx.origin != SessionOrigin::None;

    if !charger.connected {
        return Decision::new(Hold, ChargingStatus::Idle, SessionOrigin::None, "vehicle not connected");
    }

    if charger
        .vehicle_soc_percent
        .is_some_and(|soc| soc >= ctx.soc_limit)
    {
        let command = if charger.charging && ours { Stop } else { Hold };
        return Decision::new(command, ChargingStatus::Complete, SessionOrigin::None, "charge limit reached");
    }

    if charger.charging && !ours {
        return Decision::new(Hold, ChargingStatus::GridCharging, SessionOrigin::None, "manual session");
    }

    if let Some(slot) = ctx.schedule.slot_at(ctx.now) {
        let amps = match ctx.live_cap {
            Some(cap) => slot.charge_rate_amps.min(cap),
            None => slot.charge_rate_amps,
        };
        if amps == 0 {
            let command = if charger.charging { Stop } else { Hold };
            return Decision::new(command, ChargingStatus::Paused, SessionOrigin::None, "hourly budget exhausted");
        }
        let status = if slot.slot.solar_energy_kwh > SOLAR_STATUS_MIN_KWH {
            ChargingStatus::SolarCharging
        } else {
            ChargingStatus::GridCharging
        };
        let command = if !charger.charging {
            Start { amps }
        } else if (charger.current_amps - amps as f64).abs() >= 1.0 {
            Adjust { amps }
        } else {
            Hold
        };
        return Decision::new(command, status, SessionOrigin::Scheduled, "scheduled slot");
    }

    if charger.charging && ctx.origin == SessionOrigin::Scheduled {
        return Decision::new(Stop, waiting_status(ctx), SessionOrigin::None, "scheduled slot ended");
    }

    match ctx.solar {
        Some(SolarAction::Charge { amps, mode }) => {
            let reason = match mode {
                SolarMode::Pure => "solar surplus",
                SolarMode::Blended => "blended solar and cheap grid",
            };
            let command = if !charger.charging {
                Start { amps }
            } else if (charger.current_amps - amps as f64).abs() >= 1.0 {
                Adjust { amps }
            } else {
                Hold
            };
            Decision::new(command, ChargingStatus::SolarCharging, SessionOrigin::Solar, reason)
        }
        Some(SolarAction::Stop) if charger.charging => {
            Decision::new(Stop, ChargingStatus::Paused, SessionOrigin::None, "solar surplus too low")
        }
        _ if charger.charging => {
            Decision::new(Hold, ChargingStatus::SolarCharging, ctx.origin, "solar session unchanged")
        }
        _ => Decision::new(Hold, waiting_status(ctx), SessionOrigin::None, "outside scheduled slots"),
    }
}

fn waiting_status(ctx: &TickContext<'_>) -> ChargingStatus {
    if ctx.schedule.mode == ScheduleMode::Complete {
        ChargingStatus::Complete
    } else if ctx.schedule.next_slot_start(ctx.now).is_some() {
        ChargingStatus::WaitingForSlot
    } else {
        ChargingStatus::Idle
    }
}

/// Send a decided command to the charger.
pub async fn apply(charger: &dyn ChargerControl, decision: &Decision) -> Result<()> {
    match decision.command {
        ChargerCommand::Start { amps } => {
            charger
                .set_charge_rate(amps)
                .await
                .context("setting charge rate before start")?;
            charger.start().await.context("starting charge")?;
            info!(amps, reason = decision.reason, "Started charging");
        }
        ChargerCommand::Adjust { amps } => {
            charger
                .set_charge_rate(amps)
                .await
                .context("adjusting charge rate")?;
            info!(amps, reason = decision.reason, "Adjusted charge rate");
        }
        ChargerCommand::Stop => {
            charger.stop().await.context("stopping charge")?;
            info!(reason = decision.reason, "Stopped charging");
        }
        ChargerCommand::Hold => {}
    }
    Ok(())
}
