use anyhow::Result;
use chrono::NaiveTime;
use chrono_tz::Tz;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;
use std::net::SocketAddr;
use validator::Validate;

use crate::domain::ChargerConfig;
use crate::error::ConfigError;
use crate::optimizer::TariffSettings;
use crate::pricing::{SellPricePolicy, SolarCurve};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct Config {
    #[validate(nested)]
    pub server: ServerConfig,
    #[validate(nested)]
    pub controller: ControllerConfig,
    #[validate(nested)]
    pub vehicle: VehicleConfig,
    #[validate(nested)]
    pub charger: ChargerSettings,
    #[validate(nested)]
    pub pricing: PricingConfig,
    #[validate(nested)]
    pub solar: SolarConfig,
    #[validate(nested)]
    pub tariff: TariffConfig,
    #[validate(nested)]
    pub data: DataConfig,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[validate(range(min = 1))]
    pub request_timeout_secs: u64,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ControllerConfig {
    /// Master switch; when off the executor never touches the charger
    pub enabled: bool,
    #[validate(range(min = 1))]
    pub tick_seconds: u64,
    #[validate(range(min = 1))]
    pub reoptimize_every_minutes: u64,
    /// IANA zone used for the daily deadline
    pub timezone: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct VehicleConfig {
    #[validate(range(exclusive_min = 0.0))]
    pub battery_capacity_kwh: f64,
    #[validate(range(exclusive_min = 0.0, max = 1.0))]
    pub charging_efficiency: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub min_soc_guarantee: f64,
    /// Daily local time, `HH:MM` or `HH:MM:SS`
    pub guarantee_deadline: String,
    /// Used when the vehicle does not report its own charge limit
    #[validate(range(min = 0.0, max = 100.0))]
    pub target_soc: f64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ChargerSettings {
    #[validate(range(min = 1))]
    pub min_charge_amps: u32,
    #[validate(range(min = 1, max = 80))]
    pub max_charge_amps: u32,
    #[validate(range(exclusive_min = 0.0))]
    pub voltage: f64,
    #[validate(range(min = 1, max = 3))]
    pub phases: u32,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PricingConfig {
    /// 0 disables the ceiling
    #[validate(range(min = 0.0))]
    pub price_ceiling: f64,
    /// Flat export price, used when no time-varying sell price is available
    pub sell_price: Option<f64>,
    #[validate(range(min = 0.0, max = 1.0))]
    pub sell_price_fraction: f64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SolarConfig {
    pub opportunistic_enabled: bool,
    #[validate(range(min = 0.0, max = 1.0))]
    pub confidence: f64,
    #[validate(range(min = 0.0))]
    pub baseload_kw: f64,
    #[validate(range(min = 0.0))]
    pub pure_threshold_w: f64,
    #[validate(range(min = 0.0))]
    pub blended_min_w: f64,
    #[validate(range(exclusive_min = 0.0, max = 1.0))]
    pub blended_price_factor: f64,
    pub min_change_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TariffConfig {
    pub enabled: bool,
    #[validate(range(exclusive_min = 0.0))]
    pub hourly_limit_kw: f64,
    #[validate(range(min = 0.0))]
    pub safety_margin_kw: f64,
    pub tariff_rate_per_kw: Option<f64>,
    #[validate(range(exclusive_min = 0.0))]
    pub assumed_throttled_kw: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub fallback_budget_used_fraction: f64,
    #[validate(range(min = 0.0))]
    pub fallback_other_load_kw: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    File,
    Http,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct DataConfig {
    pub source: DataSource,
    /// JSON document read by the file provider
    pub path: String,
    /// Base URL of the HTTP provider (`/forecast` and `/readings` are appended)
    pub base_url: String,
    #[validate(range(min = 1))]
    pub http_timeout_seconds: u64,
    pub cache_ttl_seconds: u64,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let figment = Figment::new()
            .merge(Toml::file("config/default.toml"))
            .merge(Env::prefixed("OCS__").split("__"));
        Self::from_figment(figment)
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let cfg: Config = figment.extract()?;
        cfg.validate()?;
        cfg.check_consistency()?;
        Ok(cfg)
    }

    /// Cross-field rules the derive cannot express.
    fn check_consistency(&self) -> Result<(), ConfigError> {
        if self.charger.min_charge_amps > self.charger.max_charge_amps {
            return Err(ConfigError::Invalid(format!(
                "charger.min_charge_amps ({}) exceeds charger.max_charge_amps ({})",
                self.charger.min_charge_amps, self.charger.max_charge_amps
            )));
        }
        if self.solar.blended_min_w > self.solar.pure_threshold_w {
            return Err(ConfigError::Invalid(
                "solar.blended_min_w exceeds solar.pure_threshold_w".to_string(),
            ));
        }
        if self.tariff.safety_margin_kw >= self.tariff.hourly_limit_kw {
            return Err(ConfigError::Invalid(
                "tariff.safety_margin_kw must be below tariff.hourly_limit_kw".to_string(),
            ));
        }
        if let Some(rate) = self.tariff.tariff_rate_per_kw {
            if !rate.is_finite() || rate < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "tariff.tariff_rate_per_kw must be non-negative, got {rate}"
                )));
            }
        }
        if self.data.source == DataSource::Http && self.data.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "data.base_url is required for the http source".to_string(),
            ));
        }
        self.timezone()?;
        self.deadline_time()?;
        Ok(())
    }

    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        self.controller
            .timezone
            .parse::<Tz>()
            .map_err(|e| ConfigError::Invalid(format!("controller.timezone: {e}")))
    }

    pub fn deadline_time(&self) -> Result<NaiveTime, ConfigError> {
        let raw = self.vehicle.guarantee_deadline.trim();
        NaiveTime::parse_from_str(raw, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
            .map_err(|e| ConfigError::Invalid(format!("vehicle.guarantee_deadline '{raw}': {e}")))
    }

    pub fn charger_config(&self) -> ChargerConfig {
        ChargerConfig {
            min_charge_amps: self.charger.min_charge_amps,
            max_charge_amps: self.charger.max_charge_amps,
            voltage: self.charger.voltage,
            phases: self.charger.phases,
            price_ceiling: self.pricing.price_ceiling,
        }
    }

    pub fn tariff_settings(&self) -> TariffSettings {
        TariffSettings {
            hourly_limit_kw: self.tariff.hourly_limit_kw,
            safety_margin_kw: self.tariff.safety_margin_kw,
            tariff_rate_per_kw: self.tariff.tariff_rate_per_kw,
            assumed_throttled_kw: self.tariff.assumed_throttled_kw,
            fallback_budget_used_fraction: self.tariff.fallback_budget_used_fraction,
            fallback_other_load_kw: self.tariff.fallback_other_load_kw,
        }
    }

    pub fn sell_policy(&self) -> SellPricePolicy {
        SellPricePolicy {
            flat: self.pricing.sell_price,
            fraction_of_buy: self.pricing.sell_price_fraction,
        }
    }

    pub fn solar_curve(&self) -> SolarCurve {
        SolarCurve::new(self.solar.confidence, self.solar.baseload_kw)
    }
}
