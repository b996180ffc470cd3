use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::error::SchedulerError;

/// API error types that can be returned from handlers
#[derive(Debug, Error)]
pub enum ApiError {
    /// Inputs the scheduler refuses to plan with
    #[error("Scheduling rejected: {0}")]
    SchedulingRejected(String),

    /// Forecast, meter or charger data could not be obtained
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

/// Error response that gets serialized to JSON
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl ApiError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::SchedulingRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Get the error type string
    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::SchedulingRejected(_) => "SchedulingRejected",
            ApiError::ServiceUnavailable(_) => "ServiceUnavailable",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_type = self.error_type();

        match &self {
            ApiError::ServiceUnavailable(_) => tracing::warn!(error = %self, "Service unavailable"),
            ApiError::SchedulingRejected(_) => tracing::debug!(error = %self, "Scheduling rejected"),
        }

        let error_response = ErrorResponse {
            error: error_type.to_string(),
            message: self.to_string(),
        };

        (status, Json(error_response)).into_response()
    }
}

impl From<SchedulerError> for ApiError {
    fn from(error: SchedulerError) -> Self {
        match error {
            SchedulerError::SocUnavailable => ApiError::ServiceUnavailable(error.to_string()),
            _ => ApiError::SchedulingRejected(error.to_string()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<SchedulerError>() {
            Ok(e) => e.into(),
            // Upstream data or charger I/O
            Err(e) => ApiError::ServiceUnavailable(format!("{e:#}")),
        }
    }
}
