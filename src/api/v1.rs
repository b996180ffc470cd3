use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::{get, post}, Router};
use serde::Serialize;
use std::time::Instant;
use tracing::info;

use super::error::ApiError;
use super::response::{success, ApiResponse};
use crate::controller::{AppState, ControllerStatus, TaskStatus};
use crate::domain::ScheduleView;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/schedule", get(get_schedule))
        .route("/schedule/recompute", post(recompute_schedule))
        .route("/status", get(get_status))
        .with_state(state)
}

pub async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}

/// Last published schedule.
pub async fn get_schedule(State(st): State<AppState>) -> ApiResponse<ScheduleView> {
    let schedule = st.controller.published().await;
    success(schedule.view(st.controller.now())).with_schedule(schedule.id)
}

/// Manual trigger, equivalent to a scheduled cycle.
pub async fn recompute_schedule(
    State(st): State<AppState>,
) -> Result<ApiResponse<ScheduleView>, ApiError> {
    let started = Instant::now();
    let schedule = st.tasks.run_reoptimize_once().await?;
    info!(schedule_id = %schedule.id, "Manual recompute published");
    Ok(success(schedule.view(st.controller.now()))
        .with_schedule(schedule.id)
        .with_duration(started.elapsed().as_millis() as u64))
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub controller: ControllerStatus,
    pub reoptimize_task: TaskStatus,
    pub executor_task: TaskStatus,
}

pub async fn get_status(State(st): State<AppState>) -> ApiResponse<StatusResponse> {
    success(StatusResponse {
        controller: st.controller.status().await,
        reoptimize_task: st.tasks.get_reoptimize_status().await,
        executor_task: st.tasks.get_executor_status().await,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::domain::SimulatedCharger;
    use crate::forecast::MockSiteDataProvider;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use figment::providers::{Format, Toml};
    use figment::Figment;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app(provider: MockSiteDataProvider) -> Router {
        let cfg = Config::from_figment(
            Figment::new().merge(Toml::string(include_str!("../../config/default.toml"))),
        )
        .unwrap();
        let charger = SimulatedCharger::idle(cfg.charger_config(), cfg.vehicle.battery_capacity_kwh);
        let state = AppState::with_parts(cfg, Arc::new(provider), Arc::new(charger)).unwrap();
        router(state)
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_healthz() {
        let resp = app(MockSiteDataProvider::new())
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_schedule_before_first_cycle_is_empty() {
        let resp = app(MockSiteDataProvider::new())
            .oneshot(Request::get("/schedule").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["slot_count"], 0);
        assert_eq!(json["data"]["schedule"].as_array().unwrap().len(), 0);
        assert!(json["metadata"]["schedule_id"].is_string());
    }

    #[tokio::test]
    async fn test_recompute_reports_upstream_failure() {
        let mut provider = MockSiteDataProvider::new();
        provider
            .expect_forecast()
            .returning(|| Err(anyhow::anyhow!("price feed timeout")));
        let resp = app(provider)
            .oneshot(
                Request::post("/schedule/recompute")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let json = body_json(resp).await;
        assert_eq!(json["error"], "ServiceUnavailable");
    }

    #[tokio::test]
    async fn test_status() {
        let resp = app(MockSiteDataProvider::new())
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = body_json(resp).await;
        assert_eq!(json["data"]["controller"]["status"], "idle");
        assert_eq!(json["data"]["controller"]["status_code"], 0);
        assert_eq!(json["data"]["reoptimize_task"]["run_count"], 0);
    }
}
