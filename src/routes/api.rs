// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Poll status API.

use crate::error::{AppError, Result};
use crate::services::PollStatus;
use crate::AppState;
use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/polls", get(list_polls))
        .route("/polls/{user_id}", get(get_poll))
}

// ─── Poll Status ─────────────────────────────────────────────

/// Registered polls response.
#[derive(Serialize)]
pub struct PollsResponse {
    pub period_secs: u64,
    pub count: u32,
    pub active: usize,
    pub polls: Vec<PollStatus>,
}

/// List every registered poll.
async fn list_polls(State(state): State<Arc<AppState>>) -> Json<PollsResponse> {
    let settings = state.scheduler.settings();
    Json(PollsResponse {
        period_secs: settings.period.as_secs(),
        count: settings.count,
        active: state.scheduler.active_count(),
        polls: state.scheduler.polls(),
    })
}

/// Status of one user's poll.
async fn get_poll(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<PollStatus>> {
    state
        .scheduler
        .polls()
        .into_iter()
        .find(|p| p.user_id == user_id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("No poll for user {}", user_id)))
}
