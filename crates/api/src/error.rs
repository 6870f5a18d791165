//! API error types with HTTP response mapping.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::CommerceError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Missing or malformed caller identity.
    Unauthorized(String),
    /// Malformed path, query or body.
    BadRequest(String),
    /// Error raised by a service.
    Commerce(CommerceError),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Commerce(err) => (commerce_status(err), err.code()),
        }
    }
}

fn commerce_status(err: &CommerceError) -> StatusCode {
    match err {
        CommerceError::NotFound { .. }
        | CommerceError::ProductNotFound(_)
        | CommerceError::OrderNotFound(_) => StatusCode::NOT_FOUND,
        CommerceError::Forbidden(_) => StatusCode::FORBIDDEN,
        CommerceError::InvalidStatus { .. }
        | CommerceError::InvalidTransition { .. }
        | CommerceError::NoValidTransition { .. }
        | CommerceError::InsufficientStock { .. } => StatusCode::CONFLICT,
        CommerceError::EmptyCart | CommerceError::Validation(_) => StatusCode::BAD_REQUEST,
        CommerceError::LockUnavailable { .. } | CommerceError::CheckoutUnavailable => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        CommerceError::DeadlineExceeded(_) => StatusCode::REQUEST_TIMEOUT,
        CommerceError::CheckoutFailed(_) | CommerceError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = match &self {
            ApiError::Unauthorized(msg) | ApiError::BadRequest(msg) => msg.clone(),
            ApiError::Commerce(CommerceError::Internal(detail)) => {
                tracing::error!(error = %detail, "internal server error");
                "internal server error".to_string()
            }
            ApiError::Commerce(err) => {
                if status.is_server_error() {
                    tracing::error!(error = %err, code, "request failed");
                }
                err.to_string()
            }
        };

        let body = serde_json::json!({ "error": { "code": code, "message": message } });
        (status, axum::Json(body)).into_response()
    }
}

impl From<CommerceError> for ApiError {
    fn from(err: CommerceError) -> Self {
        ApiError::Commerce(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}
