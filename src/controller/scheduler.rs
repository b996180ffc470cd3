use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::ChargeController;
use crate::domain::ChargeSchedule;

/// Periodic task configuration
#[derive(Debug, Clone)]
pub struct PeriodicTaskConfig {
    /// Re-optimization interval (seconds)
    pub reoptimize_interval_secs: u64,
    /// Executor tick interval (seconds)
    pub executor_tick_secs: u64,
}

impl Default for PeriodicTaskConfig {
    fn default() -> Self {
        Self {
            reoptimize_interval_secs: 3600, // 1 hour
            executor_tick_secs: 60,
        }
    }
}

/// Task status tracking
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskStatus {
    pub last_run: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub run_count: u64,
    pub success_count: u64,
    pub error_count: u64,
}

impl TaskStatus {
    fn begin(&mut self, now: DateTime<Utc>) {
        self.last_run = Some(now);
        self.run_count += 1;
    }

    fn succeed(&mut self, now: DateTime<Utc>) {
        self.last_success = Some(now);
        self.success_count += 1;
        self.last_error = None;
    }

    fn fail(&mut self, err: &anyhow::Error) {
        self.error_count += 1;
        self.last_error = Some(format!("{err:#}"));
    }
}

/// Periodic task scheduler
pub struct TaskScheduler {
    config: PeriodicTaskConfig,
    controller: Arc<ChargeController>,
    reoptimize_status: Arc<RwLock<TaskStatus>>,
    executor_status: Arc<RwLock<TaskStatus>>,
}

impl TaskScheduler {
    pub fn new(controller: Arc<ChargeController>) -> Self {
        Self::with_config(controller, PeriodicTaskConfig::default())
    }

    pub fn with_config(controller: Arc<ChargeController>, config: PeriodicTaskConfig) -> Self {
        Self {
            config,
            controller,
            reoptimize_status: Arc::new(RwLock::new(TaskStatus::default())),
            executor_status: Arc::new(RwLock::new(TaskStatus::default())),
        }
    }

    pub fn config(&self) -> &PeriodicTaskConfig {
        &self.config
    }

    /// Start all periodic tasks
    pub fn start(self: Arc<Self>) {
        if !self.controller.settings().enabled {
            info!("Controller disabled, periodic tasks not started");
            return;
        }

        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.run_reoptimize_task().await;
        });

        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.run_executor_task().await;
        });

        info!(
            reoptimize_secs = self.config.reoptimize_interval_secs,
            tick_secs = self.config.executor_tick_secs,
            "All periodic tasks started"
        );
    }

    /// Recompute and publish a schedule now, recording the outcome.
    pub async fn run_reoptimize_once(&self) -> Result<Arc<ChargeSchedule>> {
        let started = Utc::now();
        self.reoptimize_status.write().await.begin(started);

        match self.controller.recompute(self.controller.now()).await {
            Ok(schedule) => {
                self.reoptimize_status.write().await.succeed(started);
                Ok(schedule)
            }
            Err(e) => {
                self.reoptimize_status.write().await.fail(&e);
                Err(e)
            }
        }
    }

    async fn run_reoptimize_task(&self) {
        let mut interval = interval(Duration::from_secs(self.config.reoptimize_interval_secs.max(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            info!("Running periodic re-optimization");
            match self.run_reoptimize_once().await {
                Ok(schedule) => info!(
                    mode = %schedule.mode,
                    energy_kwh = schedule.total_energy_kwh,
                    "Re-optimization completed successfully"
                ),
                // Previous schedule stays published
                Err(e) => warn!(error = %format!("{e:#}"), "Re-optimization failed"),
            }
        }
    }

    async fn run_executor_task(&self) {
        let mut interval = interval(Duration::from_secs(self.config.executor_tick_secs.max(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            let started = Utc::now();
            self.executor_status.write().await.begin(started);

            match self.controller.tick(self.controller.now()).await {
                Ok(decision) => {
                    self.executor_status.write().await.succeed(started);
                    debug!(status = %decision.status, reason = decision.reason, "Executor tick");
                }
                Err(e) => {
                    self.executor_status.write().await.fail(&e);
                    error!(error = %format!("{e:#}"), "Executor tick failed");
                }
            }
        }
    }

    pub async fn get_reoptimize_status(&self) -> TaskStatus {
        self.reoptimize_status.read().await.clone()
    }

    pub async fn get_executor_status(&self) -> TaskStatus {
        self.executor_status.read().await.clone()
    }
}
