use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Envelope for successful API responses.
///
/// Failures never use it; they are rendered by [`super::error::ApiError`].
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    /// Always true, kept so clients can branch on one field for both shapes
    pub success: bool,
    pub data: T,
    /// When the response was produced
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "ResponseMetadata::is_empty")]
    pub metadata: ResponseMetadata,
}

#[derive(Debug, Default, Serialize)]
pub struct ResponseMetadata {
    /// Time spent computing the response, for manual recomputes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Schedule the payload was rendered from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule_id: Option<Uuid>,
}

impl ResponseMetadata {
    fn is_empty(&self) -> bool {
        self.duration_ms.is_none() && self.schedule_id.is_none()
    }
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data,
            timestamp: Utc::now(),
            metadata: ResponseMetadata::default(),
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.metadata.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_schedule(mut self, id: Uuid) -> Self {
        self.metadata.schedule_id = Some(id);
        self
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

pub fn success<T: Serialize>(data: T) -> ApiResponse<T> {
    ApiResponse::success(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_response() {
        let response = ApiResponse::success("test data");
        assert!(response.success);
        assert_eq!(response.data, "test data");
        assert!(response.metadata.is_empty());
    }

    #[test]
    fn test_response_metadata() {
        let id = Uuid::new_v4();
        let response = success(3).with_duration(50).with_schedule(id);
        assert_eq!(response.metadata.duration_ms, Some(50));

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["metadata"]["schedule_id"], id.to_string());
        assert_eq!(json["metadata"]["duration_ms"], 50);
    }

    #[test]
    fn test_metadata_omitted_when_empty() {
        let json = serde_json::to_value(ApiResponse::success(1)).unwrap();
        assert!(json.get("metadata").is_none());
        assert_eq!(json["data"], 1);
    }
}
