// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Wavelet Publisher server
//!
//! Polls every authorized user's Spotify listening history and publishes
//! newly listened tracks, and serves the OAuth flow that adds new users.

use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wavelet_publisher::{
    config::{Config, MAX_RECENTLY_PLAYED},
    db::{CredentialStore, DedupCache},
    models::ClientCredentials,
    services::{
        AuthorizationService, EventHarvestService, EventPublisher, PollContext, PollScheduler,
        ResilientApiClient, SpotifyClient, SpotifyService,
    },
    AppState, DEFAULT_LOG_FILTER,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging
    init_logging();

    // Load configuration from environment
    let config = Config::from_env().expect("Failed to load configuration");
    tracing::info!(
        port = config.port,
        poll_period_secs = config.poll.period.as_secs(),
        poll_count = config.poll.count,
        "Starting Wavelet Publisher"
    );

    // Shutdown signal shared by the scheduler and retry backoff
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let client = ClientCredentials::new(
        config.spotify_client_id.clone(),
        config.spotify_client_secret.clone(),
    )
    .expect("Invalid Spotify client credentials");

    let spotify = SpotifyService::new(
        SpotifyClient::new(&config.spotify_api_url, &config.spotify_accounts_url),
        ResilientApiClient::new(config.api_max_retries).with_shutdown(shutdown_rx),
    );

    let store = CredentialStore::open(&config.credentials_path, client)
        .expect("Failed to open credential store");

    let capacity = MAX_RECENTLY_PLAYED as usize;
    let cache = match &config.dedup_snapshot_path {
        Some(path) => DedupCache::with_snapshot(capacity, path),
        None => DedupCache::new(capacity),
    }
    .expect("Failed to initialize dedup cache");

    let publisher = match &config.publish_url {
        Some(url) => {
            tracing::info!(url = %url, "Publishing listened tracks over HTTP");
            EventPublisher::http(url)
        }
        None => {
            tracing::info!("Publishing listened tracks to the log");
            EventPublisher::Log
        }
    };

    let auth = AuthorizationService::new(spotify.clone(), store.clone(), &config);
    let scheduler = Arc::new(PollScheduler::new(
        PollContext {
            auth: auth.clone(),
            harvest: EventHarvestService::new(spotify, cache),
            publisher,
            settings: config.poll,
        },
        shutdown_tx,
    ));

    // Resume polling for every user authorized before this start
    for cred in store.find_all() {
        scheduler.add_poll(cred);
    }
    tracing::info!(count = scheduler.active_count(), "Polls registered");

    // Build shared state
    let state = Arc::new(AppState {
        config: config.clone(),
        store,
        auth,
        scheduler: scheduler.clone(),
    });

    // Build router
    let app = wavelet_publisher::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Initialize structured JSON logging.
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    // RUST_LOG=wavelet_publisher=debug shows every poll tick
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(format)
        .init();
}
