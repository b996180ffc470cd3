use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::de::DeserializeOwned;
use std::{sync::Arc, time::Duration};
use tokio::sync::RwLock;
use tracing::debug;

use super::{ForecastSnapshot, SiteDataProvider, SiteReadings};

/// Fetches forecasts and readings as JSON over HTTP.
///
/// Forecasts change at most a few times a day and are cached for `ttl`;
/// readings are always fetched fresh.
#[derive(Clone)]
pub struct HttpDataProvider {
    base_url: String,
    client: reqwest::Client,
    cache: Arc<RwLock<Option<(DateTime<FixedOffset>, ForecastSnapshot)>>>,
    ttl: Duration,
}

impl HttpDataProvider {
    pub fn new(base_url: String, timeout: Duration, ttl: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("open-charge-scheduler/", env!("CARGO_PKG_VERSION"))),
        );
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;
        Ok(Self {
            base_url,
            client,
            cache: Arc::new(RwLock::new(None)),
            ttl,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self
            .client
            .get(self.url(path))
            .send()
            .await
            .with_context(|| format!("{path} GET failed"))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .with_context(|| format!("{path} read failed"))?;
        if !status.is_success() {
            anyhow::bail!("{path} API error: HTTP {status}: {body}");
        }
        serde_json::from_str(&body).with_context(|| format!("{path} JSON parse failed"))
    }
}

#[async_trait]
impl SiteDataProvider for HttpDataProvider {
    async fn forecast(&self) -> Result<ForecastSnapshot> {
        {
            let c = self.cache.read().await;
            if let Some((ts, snapshot)) = &*c {
                if (Utc::now().fixed_offset() - *ts).num_seconds() < self.ttl.as_secs() as i64 {
                    return Ok(snapshot.clone());
                }
            }
        }

        let snapshot: ForecastSnapshot = self.get_json("forecast").await?;
        debug!(
            prices = snapshot.prices.len(),
            sell_prices = snapshot.sell_prices.len(),
            solar_points = snapshot.solar.len(),
            "Fetched forecast"
        );

        let mut c = self.cache.write().await;
        *c = Some((Utc::now().fixed_offset(), snapshot.clone()));
        Ok(snapshot)
    }

    async fn readings(&self) -> Result<SiteReadings> {
        self.get_json("readings").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Measurement;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn forecast_body() -> serde_json::Value {
        serde_json::json!({
            "prices": [
                {"start": "2025-01-10T22:00:00+01:00", "duration_minutes": 60, "price": 0.42},
                {"start": "2025-01-10T23:00:00+01:00", "duration_minutes": 15, "price": 0.40}
            ],
            "solar": []
        })
    }

    #[tokio::test]
    async fn test_forecast_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/forecast"))
            .respond_with(ResponseTemplate::new(200).set_body_json(forecast_body()))
            .expect(1)
            .mount(&server)
            .await;

        let provider = HttpDataProvider::new(
            server.uri(),
            Duration::from_secs(5),
            Duration::from_secs(300),
        )
        .unwrap();
        let first = provider.forecast().await.unwrap();
        let second = provider.forecast().await.unwrap();
        assert_eq!(first.prices.len(), 2);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_readings_are_not_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/readings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "grid_power_w": -1200.0,
                "energy_used_this_hour_kwh": null,
                "other_load_kw": 0.8
            })))
            .expect(2)
            .mount(&server)
            .await;

        let provider =
            HttpDataProvider::new(server.uri(), Duration::from_secs(5), Duration::from_secs(300))
                .unwrap();
        let r = provider.readings().await.unwrap();
        provider.readings().await.unwrap();
        assert_eq!(r.energy_used_this_hour_kwh, Measurement::Unavailable);
        assert_eq!(r.other_load_kw, Measurement::Available(0.8));
    }

    #[tokio::test]
    async fn test_http_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/forecast"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let provider =
            HttpDataProvider::new(server.uri(), Duration::from_secs(5), Duration::from_secs(0))
                .unwrap();
        let err = provider.forecast().await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }
}
