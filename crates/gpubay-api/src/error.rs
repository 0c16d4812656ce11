//! API error handling.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// API error type.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Forbidden(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<gpubay_core::Error> for ApiError {
    fn from(err: gpubay_core::Error) -> Self {
        match err {
            gpubay_core::Error::Validation(msg) => ApiError::BadRequest(msg),
            gpubay_core::Error::NotFound(msg) => ApiError::NotFound(msg),
            gpubay_core::Error::NotOwner(msg) => ApiError::Forbidden(msg),
            gpubay_core::Error::InvalidTransition(msg) => ApiError::Conflict(msg),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<gpubay_db::DbError> for ApiError {
    fn from(err: gpubay_db::DbError) -> Self {
        match err {
            gpubay_db::DbError::NotFound(msg) => ApiError::NotFound(msg),
            gpubay_db::DbError::NotOwner(msg) => ApiError::Forbidden(msg),
            gpubay_db::DbError::InvalidState { job_id, status } => {
                ApiError::Conflict(format!("job {job_id} is {status}"))
            }
            _ => ApiError::Internal(err.to_string()),
        }
    }
}
