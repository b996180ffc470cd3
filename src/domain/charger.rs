use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use super::types::SLOT_HOURS;
use crate::error::SchedulerError;

/// Charger-channel errors
#[derive(Debug, Error)]
pub enum ChargerError {
    #[error("Communication error: {0}")]
    Communication(String),
    #[error("Invalid current: {0}A (out of supported range)")]
    InvalidCurrent(f64),
    #[error("Vehicle not connected")]
    VehicleNotConnected,
    #[error("Charger offline or unavailable")]
    Offline,
}

/// Electrical limits of the charger plus the optional price ceiling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargerConfig {
    pub min_charge_amps: u32,
    pub max_charge_amps: u32,
    pub voltage: f64,
    pub phases: u32,
    /// Maximum effective price for optional charging; 0 disables the ceiling.
    pub price_ceiling: f64,
}

impl ChargerConfig {
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.min_charge_amps > self.max_charge_amps {
            return Err(SchedulerError::InvalidChargerLimits(format!(
                "min_charge_amps ({}) exceeds max_charge_amps ({})",
                self.min_charge_amps, self.max_charge_amps
            )));
        }
        if self.max_charge_amps == 0 || self.phases == 0 {
            return Err(SchedulerError::InvalidChargerLimits(
                "max_charge_amps and phases must be positive".to_string(),
            ));
        }
        if !self.voltage.is_finite() || self.voltage <= 0.0 {
            return Err(SchedulerError::InvalidChargerLimits(format!(
                "voltage must be positive, got {}",
                self.voltage
            )));
        }
        if !self.price_ceiling.is_finite() || self.price_ceiling < 0.0 {
            return Err(SchedulerError::InvalidChargerLimits(format!(
                "price_ceiling must be non-negative, got {}",
                self.price_ceiling
            )));
        }
        Ok(())
    }

    /// Watts drawn per amp across all phases.
    pub fn watts_per_amp(&self) -> f64 {
        self.voltage * self.phases as f64
    }

    pub fn amps_to_kw(&self, amps: u32) -> f64 {
        amps as f64 * self.watts_per_amp() / 1000.0
    }

    /// Full-rate charge power, also the assumed power for solar discounting.
    pub fn max_power_kw(&self) -> f64 {
        self.amps_to_kw(self.max_charge_amps)
    }

    pub fn min_power_kw(&self) -> f64 {
        self.amps_to_kw(self.min_charge_amps)
    }

    /// Energy drawn from the grid over one slot at `amps`.
    pub fn slot_energy_kwh(&self, amps: u32) -> f64 {
        self.amps_to_kw(amps) * SLOT_HOURS
    }

    pub fn price_ceiling_enabled(&self) -> bool {
        self.price_ceiling > 0.0
    }
}

/// Live state reported by the charger and vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargerState {
    pub connected: bool,
    pub charging: bool,
    pub current_amps: f64,
    pub power_w: f64,
    pub vehicle_soc_percent: Option<f64>,
    /// Charge limit set in the vehicle (%), if reported.
    pub charge_limit_percent: Option<f64>,
}

/// Vehicle/charger control channel.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChargerControl: Send + Sync {
    async fn read_state(&self) -> Result<ChargerState>;
    async fn set_charge_rate(&self, amps: u32) -> Result<()>;
    async fn start(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;
}

/// Simulated charger for development and testing
#[derive(Debug)]
pub struct SimulatedCharger {
    state: Arc<RwLock<ChargerState>>,
    config: ChargerConfig,
    battery_capacity_kwh: f64,
}

impl SimulatedCharger {
    pub fn new(initial: ChargerState, config: ChargerConfig, battery_capacity_kwh: f64) -> Self {
        Self {
            state: Arc::new(RwLock::new(initial)),
            config,
            battery_capacity_kwh,
        }
    }

    /// Disconnected charger with the given limits.
    pub fn idle(config: ChargerConfig, battery_capacity_kwh: f64) -> Self {
        let initial = ChargerState {
            connected: false,
            charging: false,
            current_amps: 0.0,
            power_w: 0.0,
            vehicle_soc_percent: None,
            charge_limit_percent: None,
        };
        Self::new(initial, config, battery_capacity_kwh)
    }

    pub async fn simulate_connect(&self, soc_percent: f64, limit_percent: f64) {
        let mut st = self.state.write().await;
        st.connected = true;
        st.vehicle_soc_percent = Some(soc_percent);
        st.charge_limit_percent = Some(limit_percent);
    }

    pub async fn simulate_disconnect(&self) {
        let mut st = self.state.write().await;
        st.connected = false;
        st.charging = false;
        st.current_amps = 0.0;
        st.power_w = 0.0;
        st.vehicle_soc_percent = None;
    }

    /// Advance the session by `duration_seconds` at the current draw.
    pub async fn simulate_charging_step(&self, duration_seconds: u64, efficiency: f64) {
        let mut st = self.state.write().await;
        if !st.charging || !st.connected {
            return;
        }
        let Some(soc) = st.vehicle_soc_percent else {
            return;
        };
        let limit = st.charge_limit_percent.unwrap_or(100.0);

        let energy_kwh = st.power_w / 1000.0 * duration_seconds as f64 / 3600.0;
        let soc_gain = energy_kwh * efficiency / self.battery_capacity_kwh * 100.0;
        let new_soc = (soc + soc_gain).min(limit);
        st.vehicle_soc_percent = Some(new_soc);

        if new_soc >= limit {
            st.charging = false;
            st.current_amps = 0.0;
            st.power_w = 0.0;
        }
    }
}

#[async_trait]
impl ChargerControl for SimulatedCharger {
    async fn read_state(&self) -> Result<ChargerState> {
        Ok(self.state.read().await.clone())
    }

    async fn set_charge_rate(&self, amps: u32) -> Result<()> {
        if amps > self.config.max_charge_amps {
            return Err(ChargerError::InvalidCurrent(amps as f64).into());
        }
        let mut st = self.state.write().await;
        st.current_amps = amps as f64;
        st.power_w = if st.charging && st.connected {
            amps as f64 * self.config.watts_per_amp()
        } else {
            0.0
        };
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        let mut st = self.state.write().await;
        if !st.connected {
            return Err(ChargerError::VehicleNotConnected.into());
        }
        st.charging = true;
        st.power_w = st.current_amps * self.config.watts_per_amp();
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut st = self.state.write().await;
        st.charging = false;
        st.power_w = 0.0;
        Ok(())
    }
}
