use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use lib_common::{CoreError, StoreError};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

/// # Application Error
///
/// Everything an HTTP handler can fail with, mapped onto a status code and a
/// JSON body.
#[derive(Debug, Error)]
pub enum AppError {
    /// The item store failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    /// The monitor id in the path is outside the configured range.
    #[error("{0}")]
    UnknownMonitor(String),
    /// The submitted text was rejected.
    #[error("Invalid item text: {0}")]
    InvalidText(String),
}

impl From<CoreError> for AppError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::UnknownConsumer(..) => AppError::UnknownMonitor(e.to_string()),
            CoreError::Store(e) => AppError::Store(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_json) = match self {
            AppError::Store(e) => {
                error!("Store error: {}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    json!({
                        "error_type": "StoreError",
                        "message": "The item store is unavailable.",
                        "detail": e.to_string()
                    }),
                )
            }
            AppError::UnknownMonitor(detail) => (
                StatusCode::NOT_FOUND,
                json!({
                    "error_type": "MonitorNotFound",
                    "detail": detail
                }),
            ),
            AppError::InvalidText(detail) => {
                warn!("Rejected item text: {}", detail);
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    json!({
                        "error_type": "InvalidItemText",
                        "detail": detail
                    }),
                )
            }
        };
        (status, Json(error_json)).into_response()
    }
}
