// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Spotify OAuth authorization routes.

use axum::{
    extract::{Query, State},
    response::Redirect,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::services::PollState;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/spotify", get(auth_start))
        .route("/auth/spotify/callback", get(auth_callback))
}

/// Start OAuth flow - redirect to Spotify's consent page.
async fn auth_start(State(state): State<Arc<AppState>>) -> Result<Redirect> {
    let auth_url = state.auth.authorization_url()?;

    tracing::info!(
        client_id = %state.config.spotify_client_id,
        "Starting OAuth flow, redirecting to Spotify"
    );

    Ok(Redirect::temporary(&auth_url))
}

#[derive(Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Result of a completed authorization.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthorizedResponse {
    pub user_id: String,
    pub display_name: Option<String>,
    pub poll: Option<PollState>,
}

/// OAuth callback - exchange code for tokens, save credentials, start polling.
async fn auth_callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> Result<Json<AuthorizedResponse>> {
    if let Some(error) = params.error {
        tracing::warn!(error = %error, "OAuth error from Spotify");
        return Err(AppError::BadRequest(format!(
            "Authorization was not granted: {}",
            error
        )));
    }

    let (Some(code), Some(oauth_state)) = (params.code, params.state) else {
        return Err(AppError::BadRequest(
            "Missing code or state parameter".to_string(),
        ));
    };

    tracing::info!("Exchanging authorization code for tokens");
    let cred = state.auth.authorize_user(&code, &oauth_state).await?;

    state.scheduler.add_poll(cred.clone());

    Ok(Json(AuthorizedResponse {
        user_id: cred.user_id().to_string(),
        display_name: cred.display_name().map(str::to_string),
        poll: state.scheduler.poll_state(cred.user_id()),
    }))
}
