// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Spotify Web API client.
//!
//! Handles:
//! - Recently played tracks (with optional `before` cursor)
//! - Audio features for a batch of tracks
//! - Authorization code exchange and token refresh
//! - Current user profile
//!
//! `SpotifyClient` performs single requests and classifies the outcome as an
//! `ApiError`. `SpotifyService` layers the retry contract and argument checks
//! on top.

use crate::config::MAX_RECENTLY_PLAYED;
use crate::error::{AppError, Result};
use crate::models::{ClientCredentials, UserCredentials};
use crate::services::resilient::ResilientApiClient;
use reqwest::header::RETRY_AFTER;
use serde::Deserialize;

/// Most track ids the audio-features endpoint accepts per request.
pub const MAX_AUDIO_FEATURE_IDS: usize = 100;

/// Outcome of one failed upstream request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// 429. `retry_after_secs` is the server's (rounded down) wait hint.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// 401, or a refresh token the accounts service no longer accepts.
    #[error("unauthorized")]
    Unauthorized,

    /// Transport failures, unexpected statuses and malformed bodies.
    #[error("{0}")]
    Transient(String),
}

/// Spotify API client.
#[derive(Clone)]
pub struct SpotifyClient {
    http: reqwest::Client,
    api_url: String,
    accounts_url: String,
}

impl SpotifyClient {
    /// Create a client against the given API and accounts base URLs.
    pub fn new(api_url: impl Into<String>, accounts_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            accounts_url: accounts_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Base URL of the accounts service.
    pub fn accounts_url(&self) -> &str {
        &self.accounts_url
    }

    /// Get the user's most recently played tracks.
    pub async fn recently_played(
        &self,
        access_token: &str,
        limit: u32,
        before_ms: Option<i64>,
    ) -> std::result::Result<Vec<PlayHistory>, ApiError> {
        let url = format!("{}/me/player/recently-played", self.api_url);

        let mut query = vec![("limit", limit.to_string())];
        if let Some(before) = before_ms {
            query.push(("before", before.to_string()));
        }

        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .query(&query)
            .send()
            .await
            .map_err(|e| ApiError::Transient(e.to_string()))?;

        let page: RecentlyPlayedPage = check_response_json(response).await?;
        Ok(page.items)
    }

    /// Get audio features for several tracks. Unknown ids are dropped.
    pub async fn audio_features(
        &self,
        access_token: &str,
        track_ids: &[String],
    ) -> std::result::Result<Vec<AudioFeatures>, ApiError> {
        let url = format!("{}/audio-features", self.api_url);

        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .query(&[("ids", track_ids.join(","))])
            .send()
            .await
            .map_err(|e| ApiError::Transient(e.to_string()))?;

        let body: AudioFeaturesResponse = check_response_json(response).await?;
        Ok(body.audio_features.into_iter().flatten().collect())
    }

    /// Get the current user's profile.
    pub async fn profile(&self, access_token: &str) -> std::result::Result<SpotifyProfile, ApiError> {
        let url = format!("{}/me", self.api_url);

        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| ApiError::Transient(e.to_string()))?;

        check_response_json(response).await
    }

    /// Exchange a refresh token for a new access token.
    pub async fn refresh_token(
        &self,
        client: &ClientCredentials,
        refresh_token: &str,
    ) -> std::result::Result<TokenResponse, ApiError> {
        self.token_request(
            client,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ],
        )
        .await
    }

    /// Exchange an authorization code for access and refresh tokens.
    pub async fn exchange_code(
        &self,
        client: &ClientCredentials,
        code: &str,
        redirect_uri: &str,
    ) -> std::result::Result<TokenResponse, ApiError> {
        self.token_request(
            client,
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
            ],
        )
        .await
    }

    async fn token_request(
        &self,
        client: &ClientCredentials,
        params: &[(&str, &str)],
    ) -> std::result::Result<TokenResponse, ApiError> {
        let mut form: Vec<(&str, &str)> = vec![
            ("client_id", client.client_id()),
            ("client_secret", client.client_secret()),
        ];
        form.extend_from_slice(params);

        let response = self
            .http
            .post(format!("{}/api/token", self.accounts_url))
            .form(&form)
            .send()
            .await
            .map_err(|e| ApiError::Transient(format!("Token request failed: {}", e)))?;

        check_response_json(response).await
    }
}

/// Classify a response status, returning the response on success.
async fn check_response(
    response: reqwest::Response,
) -> std::result::Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status.as_u16() == 429 {
        let retry_after_secs = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(1);
        tracing::warn!(retry_after_secs, "Spotify rate limit hit (429)");
        return Err(ApiError::RateLimited { retry_after_secs });
    }

    if status.as_u16() == 401 {
        return Err(ApiError::Unauthorized);
    }

    let body = response.text().await.unwrap_or_default();

    // Revoked or rotated-away refresh token
    if status.as_u16() == 400 && body.contains("invalid_grant") {
        return Err(ApiError::Unauthorized);
    }

    Err(ApiError::Transient(format!("HTTP {}: {}", status, body)))
}

/// Check response and parse JSON body.
async fn check_response_json<T: for<'de> Deserialize<'de>>(
    response: reqwest::Response,
) -> std::result::Result<T, ApiError> {
    check_response(response)
        .await?
        .json()
        .await
        .map_err(|e| ApiError::Transient(format!("JSON parse error: {}", e)))
}

/// Token response from the accounts service.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Absent on refresh when Spotify keeps the current refresh token.
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: i64,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Current user's profile.
#[derive(Debug, Clone, Deserialize)]
pub struct SpotifyProfile {
    pub id: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RecentlyPlayedPage {
    #[serde(default)]
    items: Vec<PlayHistory>,
}

/// One entry of the recently-played history.
#[derive(Debug, Clone, Deserialize)]
pub struct PlayHistory {
    pub track: SimplifiedTrack,
    /// RFC3339 timestamp
    pub played_at: String,
}

/// Track data embedded in a play history item.
#[derive(Debug, Clone, Deserialize)]
pub struct SimplifiedTrack {
    /// `None` for local files, which have no Spotify id
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub artists: Vec<SimplifiedArtist>,
    #[serde(default)]
    pub duration_ms: u64,
    pub preview_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimplifiedArtist {
    pub id: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct AudioFeaturesResponse {
    #[serde(default)]
    audio_features: Vec<Option<AudioFeatures>>,
}

/// Audio features for one track.
#[derive(Debug, Clone, Deserialize)]
pub struct AudioFeatures {
    pub id: String,
    pub acousticness: f64,
    pub danceability: f64,
    pub energy: f64,
    pub instrumentalness: f64,
    pub key: i32,
    pub liveness: f64,
    pub loudness: f64,
    pub mode: i32,
    pub speechiness: f64,
    pub tempo: f64,
    pub time_signature: i32,
    pub valence: f64,
}

// ─────────────────────────────────────────────────────────────────────────────
// SpotifyService - Argument checks and retry policy around SpotifyClient
// ─────────────────────────────────────────────────────────────────────────────

/// High-level Spotify service used by the harvest and authorization flows.
///
/// Every call goes through `ResilientApiClient`. An exhausted retry budget or
/// a transient failure comes back as an empty result; only `Unauthorized` and
/// `Interrupted` surface as errors.
#[derive(Clone)]
pub struct SpotifyService {
    client: SpotifyClient,
    resilient: ResilientApiClient,
}

impl SpotifyService {
    pub fn new(client: SpotifyClient, resilient: ResilientApiClient) -> Self {
        Self { client, resilient }
    }

    pub fn client(&self) -> &SpotifyClient {
        &self.client
    }

    /// Up to `count` most recent plays, optionally before `before_ms`.
    pub async fn recently_played(
        &self,
        cred: &UserCredentials,
        count: u32,
        before_ms: Option<i64>,
    ) -> Result<Vec<PlayHistory>> {
        cred.validate()?;
        if !(1..=MAX_RECENTLY_PLAYED).contains(&count) {
            return Err(AppError::invalid(format!(
                "count must be within 1..={}, got {}",
                MAX_RECENTLY_PLAYED, count
            )));
        }
        if before_ms.is_some_and(|b| b < 0) {
            return Err(AppError::invalid("before timestamp must not be negative"));
        }

        let plays = self
            .resilient
            .execute_authenticated(move || {
                self.client
                    .recently_played(cred.access_token(), count, before_ms)
            })
            .await?;

        match plays {
            Some(plays) => Ok(plays),
            None => {
                tracing::error!(user_id = %cred.user_id(), "Unable to retrieve recently played tracks");
                Ok(Vec::new())
            }
        }
    }

    /// Audio features for `track_ids`, in one batched request.
    pub async fn audio_features(
        &self,
        cred: &UserCredentials,
        track_ids: &[String],
    ) -> Result<Vec<AudioFeatures>> {
        cred.validate()?;
        if track_ids.is_empty() {
            return Err(AppError::invalid("track ids must not be empty"));
        }
        if track_ids.len() > MAX_AUDIO_FEATURE_IDS {
            return Err(AppError::invalid(format!(
                "at most {} track ids per request, got {}",
                MAX_AUDIO_FEATURE_IDS,
                track_ids.len()
            )));
        }

        let features = self
            .resilient
            .execute_authenticated(move || self.client.audio_features(cred.access_token(), track_ids))
            .await?;

        match features {
            Some(features) => Ok(features),
            None => {
                tracing::error!(
                    user_id = %cred.user_id(),
                    tracks = track_ids.len(),
                    "Unable to retrieve audio features"
                );
                Ok(Vec::new())
            }
        }
    }

    /// Request fresh tokens for `cred`. `None` when upstream gave no answer.
    pub async fn refresh_token(&self, cred: &UserCredentials) -> Result<Option<TokenResponse>> {
        cred.validate()?;
        self.resilient
            .execute_authenticated(move || {
                self.client
                    .refresh_token(cred.client(), cred.refresh_token())
            })
            .await
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(
        &self,
        client: &ClientCredentials,
        code: &str,
        redirect_uri: &str,
    ) -> Result<Option<TokenResponse>> {
        if code.trim().is_empty() {
            return Err(AppError::invalid("authorization code must not be empty"));
        }
        self.resilient
            .execute_authenticated(move || self.client.exchange_code(client, code, redirect_uri))
            .await
    }

    /// Profile of the user owning `access_token`.
    pub async fn profile(&self, access_token: &str) -> Result<Option<SpotifyProfile>> {
        if access_token.trim().is_empty() {
            return Err(AppError::invalid("access token must not be empty"));
        }
        self.resilient
            .execute_authenticated(move || self.client.profile(access_token))
            .await
    }
}
