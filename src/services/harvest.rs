// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! One harvest cycle: fetch plays, enrich with audio features, drop anything
//! already published, and record the rest in the dedup cache.

use std::collections::{HashMap, HashSet};

use crate::config::MAX_RECENTLY_PLAYED;
use crate::db::DedupCache;
use crate::error::{AppError, Result};
use crate::models::{dedup_key, ListenedEvent, UserCredentials};
use crate::services::spotify::{AudioFeatures, PlayHistory, SpotifyService};
use crate::time_utils::minute_epoch_secs;

/// Produces only-new listened events for a user.
#[derive(Clone)]
pub struct EventHarvestService {
    spotify: SpotifyService,
    cache: DedupCache,
}

impl EventHarvestService {
    pub fn new(spotify: SpotifyService, cache: DedupCache) -> Self {
        Self { spotify, cache }
    }

    pub fn cache(&self) -> &DedupCache {
        &self.cache
    }

    /// Fetch up to `max_count` recent plays for `cred` and return those not
    /// seen before.
    ///
    /// "No data" from upstream is an empty result. `Unauthorized` and
    /// `Interrupted` propagate.
    pub async fn harvest(
        &self,
        cred: &UserCredentials,
        max_count: u32,
    ) -> Result<Vec<ListenedEvent>> {
        if !(1..=MAX_RECENTLY_PLAYED).contains(&max_count) {
            return Err(AppError::invalid(format!(
                "max_count must be within 1..={}, got {}",
                MAX_RECENTLY_PLAYED, max_count
            )));
        }

        let plays = self.spotify.recently_played(cred, max_count, None).await?;
        if plays.is_empty() {
            return Ok(Vec::new());
        }

        let track_ids = distinct_track_ids(&plays);
        if track_ids.is_empty() {
            tracing::debug!(user_id = %cred.user_id(), "No plays with a track id");
            return Ok(Vec::new());
        }

        let features = self.spotify.audio_features(cred, &track_ids).await?;
        if features.is_empty() {
            return Ok(Vec::new());
        }
        let features: HashMap<&str, &AudioFeatures> =
            features.iter().map(|f| (f.id.as_str(), f)).collect();

        let seen = self.cache.unique_keys(cred.user_id());
        let mut batch_keys = HashSet::new();
        let fresh: Vec<ListenedEvent> = plays
            .iter()
            .filter_map(|play| build_event(cred, play, &features))
            .filter(|event| !seen.contains(&event.key))
            .filter(|event| batch_keys.insert(event.key.clone()))
            .collect();

        self.cache.record(cred.user_id(), &fresh).await;

        tracing::debug!(
            user_id = %cred.user_id(),
            plays = plays.len(),
            fresh = fresh.len(),
            "Harvested recently played tracks"
        );
        Ok(fresh)
    }
}

/// Distinct track ids in first-seen order.
fn distinct_track_ids(plays: &[PlayHistory]) -> Vec<String> {
    let mut seen = HashSet::new();
    plays
        .iter()
        .filter_map(|play| play.track.id.as_deref())
        .filter(|id| seen.insert(*id))
        .map(str::to_string)
        .collect()
}

/// Join one play with its audio features.
///
/// Returns `None` for local files (no track id), unparseable timestamps and
/// tracks Spotify has no features for.
pub fn build_event(
    cred: &UserCredentials,
    play: &PlayHistory,
    features: &HashMap<&str, &AudioFeatures>,
) -> Option<ListenedEvent> {
    let track_id = play.track.id.as_deref()?;

    let Some(played_at) = minute_epoch_secs(&play.played_at) else {
        tracing::warn!(
            user_id = %cred.user_id(),
            track_id,
            played_at = %play.played_at,
            "Skipping play with unparseable timestamp"
        );
        return None;
    };

    let Some(f) = features.get(track_id) else {
        tracing::debug!(user_id = %cred.user_id(), track_id, "No audio features for track");
        return None;
    };

    let artist = play.track.artists.first();

    Some(ListenedEvent {
        key: dedup_key(cred.user_id(), track_id, played_at),
        user_id: cred.user_id().to_string(),
        user_display_name: cred.display_name().map(str::to_string),
        track_id: track_id.to_string(),
        played_at,
        name: play.track.name.clone(),
        artist_id: artist.and_then(|a| a.id.clone()),
        artist_name: artist.map(|a| a.name.clone()),
        duration_ms: play.track.duration_ms,
        preview_url: play.track.preview_url.clone(),
        acousticness: f.acousticness,
        danceability: f.danceability,
        energy: f.energy,
        instrumentalness: f.instrumentalness,
        key_signature: f.key,
        liveness: f.liveness,
        loudness: f.loudness,
        mode: f.mode,
        speechiness: f.speechiness,
        tempo: f.tempo,
        time_signature: f.time_signature,
        valence: f.valence,
    })
}
