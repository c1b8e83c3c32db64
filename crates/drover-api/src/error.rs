// SPDX-License-Identifier: GPL-3.0-or-later
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use drover_domain::DomainError;
use drover_infrastructure::BackendError;
use drover_scheduler::QueueError;
use serde::Serialize;
use tracing::{error, warn};
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug)]
pub enum ApiError {
    UnknownQueue(String),
    NotFound(String),
    BadRequest(String),
    Backend(BackendError),
}

impl From<QueueError> for ApiError {
    fn from(value: QueueError) -> Self {
        match value {
            QueueError::Invalid(err) => ApiError::BadRequest(err.to_string()),
            QueueError::Backend(err) => ApiError::Backend(err),
        }
    }
}

impl From<BackendError> for ApiError {
    fn from(value: BackendError) -> Self {
        ApiError::Backend(value)
    }
}

impl From<DomainError> for ApiError {
    fn from(value: DomainError) -> Self {
        ApiError::BadRequest(value.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::UnknownQueue(id) => (StatusCode::NOT_FOUND, format!("unknown queue: {id}")),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Backend(err) if err.is_unavailable() => {
                warn!(target: "api", error = %err, "backend unavailable");
                (StatusCode::SERVICE_UNAVAILABLE, err.to_string())
            }
            ApiError::Backend(err) => {
                error!(target: "api", error = %err, "backend error");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}
