//! Price, solar and tariff aware EV charging scheduler.

pub mod api;
pub mod config;
pub mod controller;
pub mod domain;
pub mod error;
pub mod forecast;
pub mod optimizer;
pub mod pricing;
pub mod telemetry;
