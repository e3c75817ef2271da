use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use brokerlens_core::error::AnalyticsError;

/// Application-level errors that map directly to HTTP responses.
///
/// Every variant implements [`IntoResponse`] so Axum handlers can use
/// `Result<impl IntoResponse, AppError>` as their return type.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("approval required: {0}")]
    ApprovalRequired(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<AnalyticsError> for AppError {
    fn from(err: AnalyticsError) -> Self {
        match err {
            AnalyticsError::NotFound(_) => AppError::NotFound(err.to_string()),
            AnalyticsError::Validation(msg) => AppError::BadRequest(msg),
            AnalyticsError::InvalidState(msg) => AppError::Conflict(msg),
            AnalyticsError::ApprovalRequired(msg) => AppError::ApprovalRequired(msg),
            AnalyticsError::UnsupportedFormat(format) => AppError::UnsupportedFormat(format),
            AnalyticsError::Serialization(e) => AppError::Internal(e.into()),
            AnalyticsError::Internal(e) => AppError::Internal(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "validation_error", msg.clone())
            }
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "invalid_state", msg.clone()),
            AppError::ApprovalRequired(msg) => {
                (StatusCode::FORBIDDEN, "approval_required", msg.clone())
            }
            AppError::UnsupportedFormat(format) => (
                StatusCode::BAD_REQUEST,
                "unsupported_format",
                format!("Export format {format} is not supported; use json or csv"),
            ),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error".to_string(),
                )
            }
        };

        (
            status,
            Json(json!({
                "error": {
                    "code": code,
                    "message": message,
                    "field": null
                }
            })),
        )
            .into_response()
    }
}
