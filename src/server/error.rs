//! API error type and [`axum::response::IntoResponse`] implementation.
//!
//! Every failure leaves the server as `{error: <machine_code>, message:
//! <human_text>}` with the matching status code.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::wire::ErrorBody;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("too many requests")]
    RateLimited { retry_after_secs: u64 },

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self::Internal(err.to_string())
    }

    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            Self::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "rate_limit_exceeded"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.parts();
        let message = match &self {
            // Internal details stay in the log, not on the wire.
            Self::Internal(detail) => {
                tracing::error!(%detail, "internal server error");
                "An internal server error occurred.".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(ErrorBody {
            error: code.to_string(),
            message,
        });

        match self {
            Self::RateLimited { retry_after_secs } => (
                status,
                [(header::RETRY_AFTER, retry_after_secs.to_string())],
                body,
            )
                .into_response(),
            _ => (status, body).into_response(),
        }
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<crate::error::LoreError> for ApiError {
    fn from(err: crate::error::LoreError) -> Self {
        use crate::error::LoreError;
        match err {
            LoreError::Validation(msg) => Self::Validation(msg),
            LoreError::LessonNotFound(id) => Self::NotFound(format!("lesson not found: {id}")),
            other => Self::Internal(other.to_string()),
        }
    }
}
