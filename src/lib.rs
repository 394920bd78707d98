// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Wavelet publisher: turn Spotify listening history into a stream of events
//!
//! Each authorized user is polled on a fixed period for recently played
//! tracks. Plays are enriched with audio features, deduplicated against what
//! was already published, and the new ones are handed to an event sink.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use db::CredentialStore;
use services::{AuthorizationService, PollScheduler};
use std::sync::Arc;

/// Log filter used when `RUST_LOG` is unset. Poll ticks log at `debug`, so
/// ticks with nothing new stay silent.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: CredentialStore,
    pub auth: AuthorizationService,
    pub scheduler: Arc<PollScheduler>,
}
