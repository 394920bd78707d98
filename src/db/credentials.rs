// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Persistent store of per-user OAuth credentials.
//!
//! Credentials are kept in memory and written through to a JSON file keyed by
//! user id, so each user has exactly one credential record.

use crate::db::write_json_off_thread;
use crate::error::{AppError, Result};
use crate::models::{ClientCredentials, StoredCredentials, UserCredentials};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Credential store client.
#[derive(Clone)]
pub struct CredentialStore {
    client: ClientCredentials,
    users: Arc<DashMap<String, StoredCredentials>>,
    path: Option<PathBuf>,
    /// Serializes file rewrites.
    write_lock: Arc<Mutex<()>>,
}

impl CredentialStore {
    /// Open the store at `path`, loading any credentials already saved there.
    pub fn open(path: impl AsRef<Path>, client: ClientCredentials) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let users = DashMap::new();

        if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(|e| {
                AppError::Storage(format!("Failed to read {}: {}", path.display(), e))
            })?;
            if !raw.trim().is_empty() {
                let saved: BTreeMap<String, StoredCredentials> = serde_json::from_str(&raw)
                    .map_err(|e| {
                        AppError::Storage(format!("Failed to parse {}: {}", path.display(), e))
                    })?;
                for (user_id, cred) in saved {
                    users.insert(user_id, cred);
                }
            }
        }

        tracing::info!(
            path = %path.display(),
            users = users.len(),
            "Opened credential store"
        );

        Ok(Self {
            client,
            users: Arc::new(users),
            path: Some(path),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Create a store that never touches disk.
    pub fn in_memory(client: ClientCredentials) -> Self {
        Self {
            client,
            users: Arc::new(DashMap::new()),
            path: None,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// App-level client credentials attached to every loaded user.
    pub fn client(&self) -> &ClientCredentials {
        &self.client
    }

    /// All saved user credentials, ordered by user id.
    ///
    /// Records that fail validation are skipped with a warning rather than
    /// failing the whole load.
    pub fn find_all(&self) -> Vec<UserCredentials> {
        let mut all: Vec<UserCredentials> = self
            .users
            .iter()
            .filter_map(|entry| {
                match entry.value().clone().into_credentials(self.client.clone()) {
                    Ok(cred) => Some(cred),
                    Err(e) => {
                        tracing::warn!(user_id = %entry.key(), error = %e, "Skipping invalid stored credentials");
                        None
                    }
                }
            })
            .collect();
        all.sort_by(|a, b| a.user_id().cmp(b.user_id()));

        tracing::info!(count = all.len(), "Retrieved saved user credentials");
        all
    }

    /// Get one user's credentials.
    pub fn find(&self, user_id: &str) -> Option<UserCredentials> {
        let stored = self.users.get(user_id)?.clone();
        stored.into_credentials(self.client.clone()).ok()
    }

    /// Save (insert or replace) a user's credentials.
    pub async fn save(&self, cred: &UserCredentials) -> Result<()> {
        cred.validate()?;

        self.users
            .insert(cred.user_id().to_string(), cred.to_stored());
        self.flush().await
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Rewrite the backing file from the in-memory map.
    async fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let _guard = self.write_lock.lock().await;

        let snapshot: BTreeMap<String, StoredCredentials> = self
            .users
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        write_json_off_thread(path.clone(), snapshot).await
    }
}
