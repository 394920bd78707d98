// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use axum::http::StatusCode;
use axum::response::IntoResponse;
use wavelet_publisher::error::AppError;

async fn body_json(err: AppError) -> (StatusCode, serde_json::Value) {
    let response = err.into_response();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_client_errors_include_details() {
    let (status, body) = body_json(AppError::invalid("count must be within 1..=50")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_argument");
    assert_eq!(body["details"], "count must be within 1..=50");

    let (status, body) = body_json(AppError::NotFound("No poll".to_string())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_server_errors_hide_details() {
    let (status, body) = body_json(AppError::Storage("/secret/path".to_string())).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "storage_error");
    assert!(body.get("details").is_none());

    let (status, body) = body_json(AppError::Internal(anyhow::anyhow!("boom"))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.get("details").is_none());
}

#[tokio::test]
async fn test_operational_statuses() {
    let (status, _) = body_json(AppError::Unauthorized).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = body_json(AppError::Interrupted).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "shutting_down");

    let (status, _) = body_json(AppError::Spotify("HTTP 502".to_string())).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}
