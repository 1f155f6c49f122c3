use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

use crate::store::StoreError;
use crate::workflow::WorkflowError;

/// Error body shared by every endpoint.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub message: String,
}

pub(crate) fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    let body = ErrorBody {
        success: false,
        message: message.into(),
    };
    (status, Json(body)).into_response()
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    Workflow(WorkflowError),
}

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        ApiError::Workflow(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Workflow(WorkflowError::Store(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => json_error(StatusCode::BAD_REQUEST, message),
            ApiError::Unauthorized(message) => json_error(StatusCode::UNAUTHORIZED, message),
            ApiError::Workflow(err) => {
                let status = StatusCode::from_u16(err.status_code())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                if err.is_client_error() {
                    return json_error(status, err.to_string());
                }
                // Server-side detail stays in the logs.
                error!(error = %err, "Request failed");
                let message = match err {
                    WorkflowError::TransactionFailed { .. } => "Failed to process workflow decision",
                    _ => "Internal server error",
                };
                json_error(status, message)
            }
        }
    }
}
