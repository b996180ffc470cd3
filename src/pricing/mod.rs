//! Price preparation: forecast normalization, solar lookup and effective prices.

pub mod effective;
pub mod normalizer;
pub mod solar;

pub use effective::{effective_price, EffectivePriceCalculator, SellPricePolicy};
pub use normalizer::{normalize, NormalizedForecast};
pub use solar::{SolarCurve, SolarProfile};
