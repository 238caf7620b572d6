//! Error types for Thunder Server

use axum::{
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::streaming::{RangeError, ResolveError};
use crate::upstream::UpstreamError;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Body served for every link that does not lead to an object
pub const INVALID_LINK_HTML: &str = "<h1>Invalid link. Please check your URL.</h1>";

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Link does not match any accepted form")]
    InvalidLink,

    #[error("Object {0} not found")]
    ObjectMissing(i64),

    #[error("Object {0} has unsupported media")]
    UnsupportedMedia(i64),

    #[error("Secure hash mismatch for object {0}")]
    HashMismatch(i64),

    #[error(transparent)]
    Range(#[from] RangeError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ResolveError> for AppError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::ObjectMissing(id) => AppError::ObjectMissing(id),
            ResolveError::UnsupportedMedia(id) => AppError::UnsupportedMedia(id),
            ResolveError::Upstream(e) => AppError::Upstream(e),
        }
    }
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            AppError::InvalidLink | AppError::ObjectMissing(_) | AppError::UnsupportedMedia(_) => {
                tracing::debug!("Invalid link: {}", self);
                return (StatusCode::NOT_FOUND, Html(INVALID_LINK_HTML)).into_response();
            }
            AppError::HashMismatch(id) => {
                tracing::debug!(message_id = *id, "Secure hash mismatch");
                (StatusCode::FORBIDDEN, "forbidden", "Invalid hash".to_string())
            }
            AppError::Range(RangeError::Malformed) => (
                StatusCode::BAD_REQUEST,
                "bad_request",
                "Malformed Range header".to_string(),
            ),
            AppError::Range(RangeError::Unsatisfiable { size }) => {
                return (
                    StatusCode::RANGE_NOT_SATISFIABLE,
                    [(header::CONTENT_RANGE, format!("bytes */{}", size))],
                    "416: Range not satisfiable",
                )
                    .into_response();
            }
            AppError::Upstream(e) => {
                tracing::error!("Upstream error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "upstream_error",
                    "An internal error occurred".to_string(),
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
            details: if cfg!(debug_assertions) {
                Some(self.to_string())
            } else {
                None
            },
        });

        (status, body).into_response()
    }
}
