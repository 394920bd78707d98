// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Listened-track event published downstream.

use serde::{Deserialize, Serialize};

/// A track the user listened to, enriched with its audio features.
///
/// Field names follow the downstream topic's JSON schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenedEvent {
    /// Dedup key: `{user_id}-{track_id}-{played_at}`
    pub key: String,
    pub user_id: String,
    pub user_display_name: Option<String>,
    pub track_id: String,
    /// Minute-truncated epoch seconds (UTC)
    pub played_at: i64,
    /// Track title
    pub name: String,
    pub artist_id: Option<String>,
    pub artist_name: Option<String>,
    pub duration_ms: u64,
    pub preview_url: Option<String>,

    // Audio features
    pub acousticness: f64,
    pub danceability: f64,
    pub energy: f64,
    pub instrumentalness: f64,
    pub key_signature: i32,
    pub liveness: f64,
    pub loudness: f64,
    pub mode: i32,
    pub speechiness: f64,
    pub tempo: f64,
    pub time_signature: i32,
    pub valence: f64,
}

/// Build the dedup key for a play.
pub fn dedup_key(user_id: &str, track_id: &str, played_at: i64) -> String {
    format!("{}-{}-{}", user_id, track_id, played_at)
}
