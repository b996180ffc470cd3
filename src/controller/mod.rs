pub mod executor;
pub mod scheduler;
pub mod solar;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::config::{Config, DataSource};
use crate::domain::{
    next_deadline, ChargeSchedule, ChargerConfig, ChargerControl, ChargerState, PriceSlot,
    RemediationStrategy, SimulatedCharger, SlotPass, VehicleState,
};
use crate::error::{ConfigError, ScheduleFault, SchedulerError};
use crate::forecast::{FileDataProvider, ForecastSnapshot, HttpDataProvider, SiteDataProvider, SiteReadings};
use crate::optimizer::{
    hour_start, CostTotals, MonthlyPeak, PowerBudgetThrottle, ScheduleRequest, TariffContext,
    TwoPassScheduler,
};
use crate::pricing::{normalize, EffectivePriceCalculator, SellPricePolicy, SolarCurve, SolarProfile};

pub use executor::{ChargerCommand, ChargingStatus, Decision, SessionOrigin};
pub use scheduler::{PeriodicTaskConfig, TaskScheduler, TaskStatus};
pub use solar::{PriceNow, SolarAction, SolarOpportunism};

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub controller: Arc<ChargeController>,
    pub tasks: Arc<TaskScheduler>,
}

impl AppState {
    pub fn new(cfg: Config) -> Result<Self> {
        let provider: Arc<dyn SiteDataProvider> = match cfg.data.source {
            DataSource::File => Arc::new(FileDataProvider::new(&cfg.data.path)),
            DataSource::Http => Arc::new(HttpDataProvider::new(
                cfg.data.base_url.clone(),
                std::time::Duration::from_secs(cfg.data.http_timeout_seconds),
                std::time::Duration::from_secs(cfg.data.cache_ttl_seconds),
            )?),
        };
        let charger: Arc<dyn ChargerControl> = Arc::new(SimulatedCharger::idle(
            cfg.charger_config(),
            cfg.vehicle.battery_capacity_kwh,
        ));
        Self::with_parts(cfg, provider, charger)
    }

    /// Build the state around externally supplied collaborators.
    pub fn with_parts(
        cfg: Config,
        provider: Arc<dyn SiteDataProvider>,
        charger: Arc<dyn ChargerControl>,
    ) -> Result<Self> {
        let settings = ControllerSettings::from_config(&cfg)?;
        let controller = Arc::new(ChargeController::new(settings, provider, charger));
        let tasks = Arc::new(TaskScheduler::with_config(
            controller.clone(),
            PeriodicTaskConfig {
                reoptimize_interval_secs: cfg.controller.reoptimize_every_minutes * 60,
                executor_tick_secs: cfg.controller.tick_seconds,
            },
        ));
        Ok(Self {
            cfg: Arc::new(cfg),
            controller,
            tasks,
        })
    }
}

pub fn spawn_controller_tasks(state: &AppState) {
    state.tasks.clone().start();
}

/// Settings resolved once from the configuration.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub enabled: bool,
    pub timezone: Tz,
    pub deadline_time: NaiveTime,
    pub battery_capacity_kwh: f64,
    pub charging_efficiency: f64,
    pub min_soc_guarantee: f64,
    pub target_soc: f64,
    pub charger: ChargerConfig,
    pub sell_policy: SellPricePolicy,
    pub solar_curve: SolarCurve,
    pub solar_opportunism: Option<SolarOpportunism>,
    pub throttle: Option<PowerBudgetThrottle>,
}

impl ControllerSettings {
    pub fn from_config(cfg: &Config) -> Result<Self, ConfigError> {
        let charger = cfg.charger_config();
        let solar_opportunism = cfg.solar.opportunistic_enabled.then(|| {
            SolarOpportunism::new(
                charger.clone(),
                cfg.solar.pure_threshold_w,
                cfg.solar.blended_min_w,
                cfg.solar.blended_price_factor,
                cfg.solar.min_change_interval_secs,
            )
        });
        let throttle = cfg
            .tariff
            .enabled
            .then(|| PowerBudgetThrottle::new(charger.clone(), cfg.tariff_settings()));
        Ok(Self {
            enabled: cfg.controller.enabled,
            timezone: cfg.timezone()?,
            deadline_time: cfg.deadline_time()?,
            battery_capacity_kwh: cfg.vehicle.battery_capacity_kwh,
            charging_efficiency: cfg.vehicle.charging_efficiency,
            min_soc_guarantee: cfg.vehicle.min_soc_guarantee,
            target_soc: cfg.vehicle.target_soc,
            charger,
            sell_policy: cfg.sell_policy(),
            solar_curve: cfg.solar_curve(),
            solar_opportunism,
            throttle,
        })
    }
}

/// Tariff and cost bookkeeping carried across cycles.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Ledger {
    pub monthly_peak: Option<MonthlyPeak>,
    pub cost_totals: CostTotals,
    pub last_accounted_hour: Option<DateTime<FixedOffset>>,
}

#[derive(Debug, Clone, Default)]
struct PriceContext {
    slots: Vec<PriceSlot>,
    daily_average: Option<f64>,
}

#[derive(Debug, Clone)]
struct SessionState {
    origin: SessionOrigin,
    status: ChargingStatus,
    reason: String,
    last_solar_change: Option<DateTime<FixedOffset>>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            origin: SessionOrigin::None,
            status: ChargingStatus::Idle,
            reason: "starting".to_string(),
            last_solar_change: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub enabled: bool,
    pub status: ChargingStatus,
    pub status_code: i8,
    pub reason: String,
    pub session_origin: SessionOrigin,
    pub tariff_enabled: bool,
    pub monthly_peak_kw: Option<f64>,
    pub cost_totals: CostTotals,
    pub schedule_id: uuid::Uuid,
    pub schedule_computed_at: DateTime<FixedOffset>,
}

/// Runs scheduling cycles and executor ticks against one charger.
pub struct ChargeController {
    settings: ControllerSettings,
    provider: Arc<dyn SiteDataProvider>,
    charger: Arc<dyn ChargerControl>,
    scheduler: TwoPassScheduler,
    /// Serializes compute-and-publish
    gate: Mutex<()>,
    published: RwLock<Arc<ChargeSchedule>>,
    prices: RwLock<Arc<PriceContext>>,
    ledger: RwLock<Ledger>,
    session: Mutex<SessionState>,
}

impl ChargeController {
    pub fn new(
        settings: ControllerSettings,
        provider: Arc<dyn SiteDataProvider>,
        charger: Arc<dyn ChargerControl>,
    ) -> Self {
        let now = Utc::now().with_timezone(&settings.timezone).fixed_offset();
        Self {
            scheduler: TwoPassScheduler::new(settings.charger.clone()),
            settings,
            provider,
            charger,
            gate: Mutex::new(()),
            published: RwLock::new(Arc::new(ChargeSchedule::empty(now))),
            prices: RwLock::new(Arc::new(PriceContext::default())),
            ledger: RwLock::new(Ledger::default()),
            session: Mutex::new(SessionState::default()),
        }
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Current time in the configured zone.
    pub fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.settings.timezone).fixed_offset()
    }

    /// Last published schedule.
    pub async fn published(&self) -> Arc<ChargeSchedule> {
        self.published.read().await.clone()
    }

    pub async fn ledger(&self) -> Ledger {
        self.ledger.read().await.clone()
    }

    /// Fetch fresh data, compute a schedule and publish it.
    ///
    /// Concurrent calls run one after another. On error the previous
    /// schedule stays published.
    pub async fn recompute(&self, now: DateTime<FixedOffset>) -> Result<Arc<ChargeSchedule>> {
        let _gate = self.gate.lock().await;

        let snapshot = self.provider.forecast().await.context("fetching forecast")?;
        // Unavailable readings fall back to the throttle's conservative assumptions
        let readings = self.provider.readings().await.unwrap_or_else(|e| {
            warn!(error = %e, "Readings unavailable, continuing without them");
            SiteReadings::default()
        });
        self.account(&readings).await;

        let charger_state = self
            .charger
            .read_state()
            .await
            .context("reading charger state")?;
        let vehicle = self.vehicle_state(&charger_state, now)?;

        let (slots, faults) = self.prepare_slots(&snapshot, now);
        let monthly_peak_kw = self.peak_kw_for(now).await;
        let budget = self.settings.throttle.as_ref().map(|t| {
            t.budget_state(
                readings.energy_used_this_hour_kwh,
                readings.other_load_kw,
                monthly_peak_kw,
            )
        });
        let tariff = self
            .settings
            .throttle
            .as_ref()
            .zip(budget.as_ref())
            .map(|(throttle, budget)| TariffContext { throttle, budget });

        let schedule = self.scheduler.schedule(ScheduleRequest {
            now,
            slots: &slots,
            vehicle: &vehicle,
            tariff,
            faults,
        })?;

        let schedule = Arc::new(schedule);
        let daily_average = daily_average(&snapshot, now, self.settings.timezone);
        let context = Arc::new(PriceContext {
            slots,
            daily_average,
        });
        *self.prices.write().await = context;
        *self.published.write().await = schedule.clone();

        info!(
            schedule_id = %schedule.id,
            mode = %schedule.mode,
            slots = schedule.slots.len(),
            degraded = schedule.guarantee_degraded,
            "Published schedule"
        );
        Ok(schedule)
    }

    /// One executor tick: follow the published schedule, clamp to the live
    /// tariff budget and charge opportunistically from solar.
    pub async fn tick(&self, now: DateTime<FixedOffset>) -> Result<Decision> {
        if !self.settings.enabled {
            return Ok(Decision {
                command: ChargerCommand::Hold,
                status: ChargingStatus::Idle,
                origin: SessionOrigin::None,
                reason: "controller disabled",
            });
        }

        let readings = self.provider.readings().await.unwrap_or_else(|e| {
            warn!(error = %e, "Readings unavailable for executor tick");
            SiteReadings::default()
        });
        self.account(&readings).await;

        let mut session = self.session.lock().await;
        let charger_state = match self.charger.read_state().await {
            Ok(s) => s,
            Err(e) => {
                session.status = ChargingStatus::Error;
                session.reason = e.to_string();
                return Err(e.context("reading charger state"));
            }
        };

        let schedule = self.published().await;
        let soc_limit = charger_state
            .charge_limit_percent
            .unwrap_or(self.settings.target_soc);
        let live_cap = self.live_cap(&schedule, &charger_state, &readings, now).await;
        let solar = match &self.settings.solar_opportunism {
            Some(op) if schedule.slot_at(now).is_none() => {
                // While our solar session runs the meter already nets out its draw
                let mut surplus_w = readings.export_w();
                if session.origin == SessionOrigin::Solar && charger_state.charging {
                    surplus_w += charger_state.power_w;
                }
                let prices = self.price_now(now).await;
                Some(op.evaluate(surplus_w, prices, now, session.last_solar_change))
            }
            _ => None,
        };

        let decision = executor::decide(&executor::TickContext {
            now,
            schedule: &schedule,
            charger: &charger_state,
            origin: session.origin,
            soc_limit,
            live_cap,
            solar,
        });

        if let Err(e) = executor::apply(self.charger.as_ref(), &decision).await {
            session.status = ChargingStatus::Error;
            session.reason = format!("{e:#}");
            return Err(e);
        }

        let solar_involved =
            decision.origin == SessionOrigin::Solar || session.origin == SessionOrigin::Solar;
        if solar_involved && decision.command != ChargerCommand::Hold {
            session.last_solar_change = Some(now);
        }
        if session.status != decision.status {
            info!(
                from = %session.status,
                to = %decision.status,
                code = decision.status.code(),
                reason = decision.reason,
                "Charging status changed"
            );
        }
        session.origin = decision.origin;
        session.status = decision.status;
        session.reason = decision.reason.to_string();
        Ok(decision)
    }

    pub async fn status(&self) -> ControllerStatus {
        let session = self.session.lock().await.clone();
        let ledger = self.ledger().await;
        let schedule = self.published().await;
        ControllerStatus {
            enabled: self.settings.enabled,
            status: session.status,
            status_code: session.status.code(),
            reason: session.reason,
            session_origin: session.origin,
            tariff_enabled: self.settings.throttle.is_some(),
            monthly_peak_kw: ledger.monthly_peak.map(|p| p.peak_kw),
            cost_totals: ledger.cost_totals,
            schedule_id: schedule.id,
            schedule_computed_at: schedule.computed_at,
        }
    }

    /// Apply a completed hour to the cost totals and monthly peak, once.
    async fn account(&self, readings: &SiteReadings) {
        let Some(hour) = &readings.completed_hour else {
            return;
        };
        let mut ledger = self.ledger.write().await;
        if ledger.last_accounted_hour.is_some_and(|last| hour.start <= last) {
            return;
        }
        ledger.cost_totals = ledger.cost_totals.accumulate(hour);
        let peak = ledger
            .monthly_peak
            .unwrap_or_else(|| MonthlyPeak::new(hour.start))
            .observe(hour.start, hour.average_import_kw());
        ledger.monthly_peak = Some(peak);
        ledger.last_accounted_hour = Some(hour.start);
        info!(
            hour = %hour.start,
            charger_kwh = hour.charger_kwh,
            without_solar = ledger.cost_totals.without_solar,
            with_solar = ledger.cost_totals.with_solar,
            monthly_peak_kw = peak.peak_kw,
            "Accounted completed hour"
        );
    }

    fn vehicle_state(
        &self,
        charger: &ChargerState,
        now: DateTime<FixedOffset>,
    ) -> Result<VehicleState, SchedulerError> {
        let current_soc = charger
            .vehicle_soc_percent
            .ok_or(SchedulerError::SocUnavailable)?;
        Ok(VehicleState {
            current_soc,
            target_soc: charger
                .charge_limit_percent
                .unwrap_or(self.settings.target_soc),
            min_soc_guarantee: self.settings.min_soc_guarantee,
            guarantee_deadline: next_deadline(now, self.settings.deadline_time, self.settings.timezone),
            battery_capacity_kwh: self.settings.battery_capacity_kwh,
            charging_efficiency: self.settings.charging_efficiency,
        })
    }

    /// Normalize the forecast and attach effective prices.
    fn prepare_slots(
        &self,
        snapshot: &ForecastSnapshot,
        now: DateTime<FixedOffset>,
    ) -> (Vec<PriceSlot>, Vec<ScheduleFault>) {
        let normalized = normalize(&snapshot.prices, now);
        let faults: Vec<ScheduleFault> = normalized.fault.into_iter().collect();
        let mut slots = normalized.slots;

        let sell_slots = if snapshot.sell_prices.is_empty() {
            Vec::new()
        } else {
            normalize(&snapshot.sell_prices, now).slots
        };

        let solar = if !snapshot.solar.is_empty() {
            SolarProfile::new(snapshot.solar.clone())
        } else if let Some(daily) = &snapshot.solar_daily {
            self.settings.solar_curve.two_day_profile(
                now,
                self.settings.timezone,
                daily.remaining_today_kwh,
                daily.tomorrow_kwh,
            )
        } else {
            SolarProfile::default()
        };

        EffectivePriceCalculator::new(
            self.settings.charger.max_power_kw(),
            self.settings.sell_policy.clone(),
        )
        .with_sell_series(&sell_slots)
        .apply(&mut slots, &solar);

        (slots, faults)
    }

    /// Cap for the slot running now: the hourly budget, raised when the
    /// guarantee is at risk. Mandatory slots planned above the limit are not capped.
    /// An unknown SOC never raises the cap.
    async fn live_cap(
        &self,
        schedule: &ChargeSchedule,
        charger: &ChargerState,
        readings: &SiteReadings,
        now: DateTime<FixedOffset>,
    ) -> Option<u32> {
        let throttle = self.settings.throttle.as_ref()?;
        let slot = schedule.slot_at(now)?;
        let exceeding = schedule
            .remediation
            .as_ref()
            .is_some_and(|r| r.strategy == RemediationStrategy::ExceedTariff);
        if exceeding && slot.pass == SlotPass::Mandatory {
            return None;
        }

        let peak_kw = self.peak_kw_for(now).await;
        let budget = throttle.budget_state(
            readings.energy_used_this_hour_kwh,
            readings.other_load_kw,
            peak_kw,
        );
        let minutes_remaining =
            (hour_start(now) + Duration::hours(1) - now).num_seconds() as f64 / 60.0;
        let rate_now = throttle.max_charge_rate_now(&budget, minutes_remaining);

        // Without a SOC the guarantee cannot be judged, so the cap stands
        let Some(soc) = charger.vehicle_soc_percent else {
            warn!(rate_now, "Vehicle SOC unavailable, no guarantee override");
            return Some(rate_now);
        };
        let need_kwh = (self.settings.min_soc_guarantee - soc).max(0.0) / 100.0
            * self.settings.battery_capacity_kwh
            / self.settings.charging_efficiency;
        let hours = (schedule.deadline - now).num_seconds() as f64 / 3600.0;
        let check = throttle.check_guarantee(need_kwh, hours);
        Some(throttle.final_rate(rate_now, &check))
    }

    /// Peak of the billing month containing `now`; 0 once the month has rolled over.
    async fn peak_kw_for(&self, now: DateTime<FixedOffset>) -> f64 {
        let current = MonthlyPeak::new(now);
        self.ledger
            .read()
            .await
            .monthly_peak
            .filter(|p| p.year == current.year && p.month == current.month)
            .map_or(0.0, |p| p.peak_kw)
    }

    async fn price_now(&self, now: DateTime<FixedOffset>) -> Option<PriceNow> {
        let context = self.prices.read().await.clone();
        let slot = context.slots.iter().find(|s| s.contains(now))?;
        Some(PriceNow {
            buy: slot.raw_price,
            sell: slot.sell_price,
            daily_average: context.daily_average?,
        })
    }
}

/// Average buy price of the local calendar day containing `now`.
fn daily_average(snapshot: &ForecastSnapshot, now: DateTime<FixedOffset>, tz: Tz) -> Option<f64> {
    let today = now.with_timezone(&tz).date_naive();
    let prices: Vec<f64> = snapshot
        .prices
        .iter()
        .filter(|e| e.start.with_timezone(&tz).date_naive() == today && e.price.is_finite())
        .map(|e| e.price)
        .collect();
    (!prices.is_empty()).then(|| prices.iter().sum::<f64>() / prices.len() as f64)
}
