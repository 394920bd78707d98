// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Spotify authorization code flow and credential refresh.
//!
//! The OAuth `state` parameter is self-contained: a timestamp and random nonce
//! signed with HMAC-SHA256, so no server-side record of pending logins is kept.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::Sha256;

use crate::config::Config;
use crate::db::CredentialStore;
use crate::error::{AppError, Result};
use crate::models::UserCredentials;
use crate::services::spotify::SpotifyService;

type HmacSha256 = Hmac<Sha256>;

/// How long a signed state value is accepted after it was issued.
pub const STATE_MAX_AGE_SECS: i64 = 10 * 60;

/// Authorization and refresh of user credentials.
#[derive(Clone)]
pub struct AuthorizationService {
    spotify: SpotifyService,
    store: CredentialStore,
    state_key: Vec<u8>,
    redirect_uri: String,
    scopes: String,
    rng: SystemRandom,
}

impl AuthorizationService {
    pub fn new(spotify: SpotifyService, store: CredentialStore, config: &Config) -> Self {
        Self {
            spotify,
            store,
            state_key: config.oauth_state_key.clone(),
            redirect_uri: config.redirect_uri(),
            scopes: config.spotify_scopes.clone(),
            rng: SystemRandom::new(),
        }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// URL of Spotify's consent page, carrying a freshly signed state.
    pub fn authorization_url(&self) -> Result<String> {
        let state = self.sign_state(Utc::now().timestamp())?;

        Ok(format!(
            "{}/authorize?client_id={}&response_type=code&redirect_uri={}&scope={}&state={}&show_dialog=true",
            self.spotify.client().accounts_url(),
            urlencoding::encode(self.store.client().client_id()),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(&self.scopes),
            state
        ))
    }

    /// Complete the code flow: check state, exchange the code, look up the
    /// user and persist their credentials.
    pub async fn authorize_user(&self, code: &str, state: &str) -> Result<UserCredentials> {
        self.verify_state(state, Utc::now().timestamp())?;

        let client = self.store.client();
        let tokens = self
            .spotify
            .exchange_code(client, code, &self.redirect_uri)
            .await?
            .ok_or_else(|| AppError::Spotify("Authorization code exchange failed".to_string()))?;

        let refresh_token = tokens.refresh_token.ok_or_else(|| {
            AppError::Spotify("Token response did not include a refresh token".to_string())
        })?;

        let profile = self
            .spotify
            .profile(&tokens.access_token)
            .await?
            .ok_or_else(|| AppError::Spotify("Unable to fetch user profile".to_string()))?;

        let cred = UserCredentials::new(
            profile.id,
            profile.display_name,
            tokens.access_token,
            refresh_token,
            client.clone(),
        )?;
        self.store.save(&cred).await?;

        tracing::info!(user = %cred, "Authorized user");
        Ok(cred)
    }

    /// Refresh `cred`'s access token.
    ///
    /// Returns `Ok(None)` when Spotify gave no usable answer this time, and
    /// `Err(Unauthorized)` when the refresh token has been revoked. The new
    /// credentials are persisted; a storage failure is logged and the
    /// refreshed value is still returned.
    pub async fn refresh_user(&self, cred: &UserCredentials) -> Result<Option<UserCredentials>> {
        let Some(tokens) = self.spotify.refresh_token(cred).await? else {
            tracing::warn!(user = %cred, "Token refresh returned nothing");
            return Ok(None);
        };

        let rotated = tokens.refresh_token.is_some();
        let next = cred.refreshed(tokens.access_token, tokens.refresh_token)?;

        if let Err(e) = self.store.save(&next).await {
            tracing::error!(user = %next, error = %e, "Failed to persist refreshed credentials");
        }

        tracing::debug!(user = %next, rotated, "Refreshed access token");
        Ok(Some(next))
    }

    fn sign_state(&self, issued_at: i64) -> Result<String> {
        let mut nonce = [0u8; 16];
        self.rng
            .fill(&mut nonce)
            .map_err(|_| AppError::Internal(anyhow::anyhow!("Failed to generate state nonce")))?;

        // Format is "timestamp_hex|nonce_hex|signature_hex"
        let payload = format!("{:x}|{}", issued_at, hex::encode(nonce));
        let signature = sign(&self.state_key, &payload)?;

        Ok(URL_SAFE_NO_PAD.encode(format!("{}|{}", payload, signature)))
    }

    /// Check that `state` was issued by us within the last
    /// `STATE_MAX_AGE_SECS` as of `now`.
    pub fn verify_state(&self, state: &str, now: i64) -> Result<()> {
        let bad_state = || AppError::BadRequest("Invalid OAuth state".to_string());

        let bytes = URL_SAFE_NO_PAD.decode(state).map_err(|_| bad_state())?;
        let decoded = String::from_utf8(bytes).map_err(|_| bad_state())?;

        let parts: Vec<&str> = decoded.splitn(3, '|').collect();
        let [timestamp_hex, nonce_hex, signature_hex] = parts[..] else {
            return Err(bad_state());
        };

        let payload = format!("{}|{}", timestamp_hex, nonce_hex);
        let signature = hex::decode(signature_hex).map_err(|_| bad_state())?;

        let mut mac = HmacSha256::new_from_slice(&self.state_key)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("HMAC init failed: {}", e)))?;
        mac.update(payload.as_bytes());
        if mac.verify_slice(&signature).is_err() {
            tracing::error!("OAuth state signature mismatch");
            return Err(bad_state());
        }

        let issued_at = i64::from_str_radix(timestamp_hex, 16).map_err(|_| bad_state())?;
        if now.saturating_sub(issued_at) > STATE_MAX_AGE_SECS || issued_at > now + 60 {
            tracing::warn!(issued_at, now, "OAuth state expired");
            return Err(AppError::BadRequest("OAuth state expired".to_string()));
        }

        Ok(())
    }
}

fn sign(key: &[u8], payload: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("HMAC init failed: {}", e)))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}
