// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! OAuth credentials for the app and for each authorized user.
//!
//! Both types are immutable once built. A token refresh produces a new
//! `UserCredentials`; the previous value must not be used again.

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// App-level client credentials, shared by all users.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    client_id: String,
    client_secret: String,
}

impl ClientCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Result<Self> {
        let client_id = client_id.into();
        let client_secret = client_secret.into();
        if client_id.trim().is_empty() || client_secret.trim().is_empty() {
            return Err(AppError::invalid("client id and secret must not be blank"));
        }
        Ok(Self {
            client_id,
            client_secret,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Tokens granting access to one user's Spotify data.
///
/// `user_id`, `access_token` and `refresh_token` are never blank.
#[derive(Clone, PartialEq, Eq)]
pub struct UserCredentials {
    user_id: String,
    display_name: Option<String>,
    access_token: String,
    refresh_token: String,
    client: ClientCredentials,
}

impl UserCredentials {
    pub fn new(
        user_id: impl Into<String>,
        display_name: Option<String>,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        client: ClientCredentials,
    ) -> Result<Self> {
        let cred = Self {
            user_id: user_id.into(),
            display_name,
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            client,
        };
        cred.validate()?;
        Ok(cred)
    }

    /// Build the successor of these credentials after a token refresh.
    ///
    /// Spotify may omit the refresh token from a refresh response, in which
    /// case the current one stays valid and is carried over.
    pub fn refreshed(&self, access_token: String, refresh_token: Option<String>) -> Result<Self> {
        Self::new(
            self.user_id.clone(),
            self.display_name.clone(),
            access_token,
            refresh_token.unwrap_or_else(|| self.refresh_token.clone()),
            self.client.clone(),
        )
    }

    /// Check the non-blank invariant.
    pub fn validate(&self) -> Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(AppError::invalid("user id must not be blank"));
        }
        if self.access_token.trim().is_empty() {
            return Err(AppError::invalid("access token must not be blank"));
        }
        if self.refresh_token.trim().is_empty() {
            return Err(AppError::invalid("refresh token must not be blank"));
        }
        Ok(())
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> &str {
        &self.refresh_token
    }

    pub fn client(&self) -> &ClientCredentials {
        &self.client
    }

    /// Persistable form; client credentials are app-level and not stored per user.
    pub fn to_stored(&self) -> StoredCredentials {
        StoredCredentials {
            user_id: self.user_id.clone(),
            display_name: self.display_name.clone(),
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
        }
    }
}

impl fmt::Debug for UserCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserCredentials")
            .field("user_id", &self.user_id)
            .field("display_name", &self.display_name)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for UserCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.display_name {
            Some(name) => write!(f, "{} ({})", self.user_id, name),
            None => f.write_str(&self.user_id),
        }
    }
}

/// User credentials as written to the credential store.
#[derive(Clone, Serialize, Deserialize)]
pub struct StoredCredentials {
    pub user_id: String,
    pub display_name: Option<String>,
    pub access_token: String,
    pub refresh_token: String,
}

impl StoredCredentials {
    /// Rehydrate with the app's client credentials, enforcing the invariant.
    pub fn into_credentials(self, client: ClientCredentials) -> Result<UserCredentials> {
        UserCredentials::new(
            self.user_id,
            self.display_name,
            self.access_token,
            self.refresh_token,
            client,
        )
    }
}
