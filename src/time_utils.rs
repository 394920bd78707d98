// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Shared helpers for date/time handling.

use chrono::{DateTime, DurationRound, SecondsFormat, TimeDelta, Utc};

/// Format a UTC timestamp as RFC3339 using a `Z` suffix.
pub fn format_utc_rfc3339(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse an upstream RFC3339 timestamp and truncate it to whole UTC minutes,
/// returning epoch seconds.
///
/// Spotify reports the same play with sub-minute jitter across polls, so
/// anything finer than a minute would destabilize dedup keys.
pub fn minute_epoch_secs(raw: &str) -> Option<i64> {
    let parsed = DateTime::parse_from_rfc3339(raw).ok()?.with_timezone(&Utc);
    let truncated = parsed.duration_trunc(TimeDelta::minutes(1)).ok()?;
    Some(truncated.timestamp())
}
