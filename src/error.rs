//! Error types for Sniper Operator

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application-level errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Operation conflicts with the current run state
    #[error("Conflict: {0}")]
    Conflict(String),
}

/// Error response structure for API
#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl AppError {
    fn status_and_reason(&self) -> (StatusCode, &'static str, &'static str) {
        match self {
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "rejected", "validation_failed"),
            AppError::Conflict(_) => (StatusCode::CONFLICT, "rejected", "conflict"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status_code, status, reason) = self.status_and_reason();
        let error_response = ErrorResponse {
            status,
            reason: reason.to_string(),
            details: Some(self.to_string()),
        };

        tracing::error!(
            error_type = %self,
            status_code = %status_code,
            "Request error"
        );

        (status_code, Json(json!(error_response))).into_response()
    }
}

/// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;
