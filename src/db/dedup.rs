// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Per-user cache of already-published listened events.
//!
//! Each user owns a bounded set of dedup keys scored by `played_at`. The
//! recently-played endpoint never returns more than `capacity` plays, so
//! remembering the newest `capacity` keys is enough to recognize repeats.
//!
//! Only the user's own poll task writes to its entry. The DashMap shard lock
//! isolates users from each other; no ordering is promised across users.

use crate::db::write_json_off_thread;
use crate::error::{AppError, Result};
use crate::models::ListenedEvent;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Dedup cache shared by all poll tasks.
#[derive(Clone)]
pub struct DedupCache {
    capacity: usize,
    users: Arc<DashMap<String, RecentKeys>>,
    snapshot: Option<PathBuf>,
    write_lock: Arc<Mutex<()>>,
}

impl DedupCache {
    /// Create a memory-only cache holding at most `capacity` keys per user.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(AppError::invalid("dedup capacity must be at least 1"));
        }
        Ok(Self {
            capacity,
            users: Arc::new(DashMap::new()),
            snapshot: None,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Create a cache backed by a JSON snapshot at `path`.
    ///
    /// An unreadable snapshot is logged and ignored: losing cache entries can
    /// only cause a repeat publish, never a lost event.
    pub fn with_snapshot(capacity: usize, path: impl AsRef<Path>) -> Result<Self> {
        let mut cache = Self::new(capacity)?;
        let path = path.as_ref().to_path_buf();

        match load_snapshot(&path) {
            Ok(Some(saved)) => {
                for (user_id, entries) in saved {
                    let mut keys = RecentKeys::default();
                    for entry in entries {
                        keys.insert(&entry.key, entry.played_at);
                    }
                    keys.trim_to(capacity);
                    cache.users.insert(user_id, keys);
                }
                tracing::info!(
                    path = %path.display(),
                    users = cache.users.len(),
                    "Loaded dedup cache snapshot"
                );
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable dedup snapshot");
            }
        }

        cache.snapshot = Some(path);
        Ok(cache)
    }

    /// Keys previously recorded for `user_id`.
    pub fn unique_keys(&self, user_id: &str) -> HashSet<String> {
        self.users
            .get(user_id)
            .map(|keys| keys.index.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of keys currently held for `user_id`.
    pub fn len(&self, user_id: &str) -> usize {
        self.users.get(user_id).map(|keys| keys.len()).unwrap_or(0)
    }

    /// Record newly published events for `user_id`.
    ///
    /// When the batch would push the set past capacity, as many of the oldest
    /// entries as there are incoming events are evicted first. Failures to
    /// write the snapshot are logged and swallowed.
    pub async fn record(&self, user_id: &str, events: &[ListenedEvent]) {
        if events.is_empty() {
            return;
        }

        {
            let mut keys = self.users.entry(user_id.to_string()).or_default();
            let incoming = events.len();

            if keys.len() + incoming > self.capacity {
                let evict = incoming.min(keys.len());
                keys.evict_oldest(evict);
                tracing::debug!(user_id, evicted = evict, "Evicted oldest dedup keys");
            }

            for event in events {
                keys.insert(&event.key, event.played_at);
            }

            // Only reachable when a single batch is larger than the cache.
            keys.trim_to(self.capacity);
        }

        self.persist().await;
    }

    /// Rewrite the snapshot file. Writes are serialized so a later snapshot
    /// never lands before an earlier one.
    async fn persist(&self) {
        let Some(path) = &self.snapshot else {
            return;
        };

        let _guard = self.write_lock.lock().await;

        let snapshot: BTreeMap<String, Vec<SnapshotEntry>> = self
            .users
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().entries()))
            .collect();

        if let Err(e) = write_json_off_thread(path.clone(), snapshot).await {
            tracing::warn!(path = %path.display(), error = %e, "Failed to write dedup snapshot");
        }
    }
}

/// Scored key set for one user, ordered by (`played_at`, insertion order).
#[derive(Default)]
struct RecentKeys {
    ordered: BTreeSet<(i64, u64, String)>,
    index: HashMap<String, (i64, u64)>,
    next_seq: u64,
}

impl RecentKeys {
    fn len(&self) -> usize {
        self.index.len()
    }

    /// Insert or re-score a key.
    fn insert(&mut self, key: &str, played_at: i64) {
        if let Some((score, seq)) = self.index.remove(key) {
            self.ordered.remove(&(score, seq, key.to_string()));
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.ordered.insert((played_at, seq, key.to_string()));
        self.index.insert(key.to_string(), (played_at, seq));
    }

    fn evict_oldest(&mut self, count: usize) {
        for _ in 0..count {
            let Some((_, _, key)) = self.ordered.pop_first() else {
                break;
            };
            self.index.remove(&key);
        }
    }

    fn trim_to(&mut self, capacity: usize) {
        let overflow = self.len().saturating_sub(capacity);
        self.evict_oldest(overflow);
    }

    fn entries(&self) -> Vec<SnapshotEntry> {
        self.ordered
            .iter()
            .map(|(played_at, _, key)| SnapshotEntry {
                key: key.clone(),
                played_at: *played_at,
            })
            .collect()
    }
}

#[derive(Serialize, Deserialize)]
struct SnapshotEntry {
    key: String,
    played_at: i64,
}

fn load_snapshot(path: &Path) -> Result<Option<BTreeMap<String, Vec<SnapshotEntry>>>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|e| AppError::Storage(format!("Failed to read {}: {}", path.display(), e)))?;
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| AppError::Storage(format!("Failed to parse {}: {}", path.display(), e)))
}
