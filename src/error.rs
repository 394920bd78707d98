// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type.
///
/// Only `Unauthorized` and `Interrupted` are operational signals that travel
/// through the harvest pipeline; rate limits and transient upstream failures
/// are absorbed by `ResilientApiClient` and never reach this type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Upstream rejected the user's tokens and they cannot be refreshed.
    #[error("Spotify authorization rejected")]
    Unauthorized,

    /// Process shutdown was observed while waiting on a backoff sleep.
    #[error("Operation interrupted by shutdown")]
    Interrupted,

    /// A caller violated a precondition. Never retried.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Spotify API error: {0}")]
    Spotify(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Shorthand for precondition failures.
    pub fn invalid(msg: impl Into<String>) -> Self {
        AppError::InvalidArgument(msg.into())
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", None),
            AppError::Interrupted => (StatusCode::SERVICE_UNAVAILABLE, "shutting_down", None),
            AppError::InvalidArgument(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_argument", Some(msg.clone()))
            }
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone()))
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            AppError::Spotify(msg) => (StatusCode::BAD_GATEWAY, "spotify_error", Some(msg.clone())),
            AppError::Storage(msg) => {
                tracing::error!(error = %msg, "Storage error");
                (StatusCode::INTERNAL_SERVER_ERROR, "storage_error", None)
            }
            AppError::Publish(msg) => {
                tracing::error!(error = %msg, "Publish error");
                (StatusCode::INTERNAL_SERVER_ERROR, "publish_error", None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers and services
pub type Result<T> = std::result::Result<T, AppError>;
