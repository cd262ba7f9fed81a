//! HTTP API Error Types
//!
//! Maps the coordinator's error taxonomy onto HTTP statuses and the
//! `{success:false, error:{code,message}}` response envelope.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::error::SearchError;

/// API error payload
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// HTTP API error that can be returned from handlers
#[derive(Debug)]
pub struct RestError {
    pub status: StatusCode,
    pub error: ApiError,
}

impl RestError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: ApiError::new("BAD_REQUEST", message),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            error: ApiError::new("NOT_FOUND", message),
        }
    }
}

impl IntoResponse for RestError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "success": false,
            "error": self.error
        }));
        (self.status, body).into_response()
    }
}

impl From<SearchError> for RestError {
    fn from(err: SearchError) -> Self {
        let (status, code) = match &err {
            SearchError::BadRequest { .. } | SearchError::IndexExists { .. } => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST")
            }
            SearchError::NotImplemented { .. } => {
                (StatusCode::NOT_IMPLEMENTED, "NOT_IMPLEMENTED")
            }
            SearchError::PlanningFailed { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "PLANNING_FAILED")
            }
            SearchError::IndexNotFound { .. }
            | SearchError::DocumentNotFound { .. }
            | SearchError::PipelineNotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            SearchError::RoutingUnavailable { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "ROUTING_UNAVAILABLE")
            }
            SearchError::ServiceUnavailable { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE")
            }
            SearchError::TimedOut { .. } => (StatusCode::GATEWAY_TIMEOUT, "TIMED_OUT"),
            SearchError::ShardFailure { .. } => (StatusCode::BAD_GATEWAY, "SHARD_FAILURE"),
            SearchError::PipelineFailed { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "PIPELINE_FAILED")
            }
            SearchError::Internal { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        };
        RestError {
            status,
            error: ApiError::new(code, err.to_string()),
        }
    }
}
