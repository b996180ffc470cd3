use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::debug;

use super::{ForecastSnapshot, SiteDataProvider, SiteReadings};

/// Reads forecasts and readings from a JSON document on disk.
///
/// The file is re-read on every call so an external process can keep it
/// current.
#[derive(Debug, Clone)]
pub struct FileDataProvider {
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct SiteDocument {
    forecast: ForecastSnapshot,
    #[serde(default)]
    readings: SiteReadings,
}

impl FileDataProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn load(&self) -> Result<SiteDocument> {
        let body = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading site data from {}", self.path.display()))?;
        let doc: SiteDocument =
            serde_json::from_str(&body).context("site data JSON parse failed")?;
        debug!(
            path = %self.path.display(),
            prices = doc.forecast.prices.len(),
            solar_points = doc.forecast.solar.len(),
            "Loaded site data file"
        );
        Ok(doc)
    }
}

#[async_trait]
impl SiteDataProvider for FileDataProvider {
    async fn forecast(&self) -> Result<ForecastSnapshot> {
        Ok(self.load().await?.forecast)
    }

    async fn readings(&self) -> Result<SiteReadings> {
        Ok(self.load().await?.readings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Measurement;

    #[tokio::test]
    async fn test_reads_document() {
        let path = std::env::temp_dir().join(format!("ocs-site-{}.json", uuid::Uuid::new_v4()));
        let doc = r#"{
            "forecast": {
                "prices": [
                    {"start": "2025-01-10T22:00:00+01:00", "duration_minutes": 60, "price": 0.42}
                ]
            },
            "readings": {"energy_used_this_hour_kwh": 1.5}
        }"#;
        tokio::fs::write(&path, doc).await.unwrap();

        let provider = FileDataProvider::new(&path);
        let forecast = provider.forecast().await.unwrap();
        assert_eq!(forecast.prices.len(), 1);
        assert!(forecast.solar.is_empty());
        let readings = provider.readings().await.unwrap();
        assert_eq!(readings.energy_used_this_hour_kwh, Measurement::Available(1.5));

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_file_is_error() {
        let provider = FileDataProvider::new("/nonexistent/ocs/site.json");
        assert!(provider.forecast().await.is_err());
    }
}
