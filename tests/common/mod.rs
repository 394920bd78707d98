// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Shared test helpers: a fake Spotify API served on an ephemeral port and
//! constructors wiring the real services against it.

use axum::{
    extract::{Form, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use wavelet_publisher::config::{Config, PollSettings, MAX_RECENTLY_PLAYED};
use wavelet_publisher::db::{CredentialStore, DedupCache};
use wavelet_publisher::models::{ClientCredentials, UserCredentials};
use wavelet_publisher::routes::create_router;
use wavelet_publisher::services::{
    AuthorizationService, EventHarvestService, EventPublisher, PollContext, PollScheduler,
    PublishedBatch, ResilientApiClient, SpotifyClient, SpotifyService,
};
use wavelet_publisher::AppState;

/// Scriptable stand-in for the Spotify Web API and accounts service.
#[derive(Default)]
pub struct FakeSpotify {
    pub plays: Mutex<Vec<Value>>,
    pub features: Mutex<Vec<Value>>,
    /// Status for recently-played instead of 200, if set.
    pub plays_status: Mutex<Option<StatusCode>>,
    /// Number of upcoming recently-played calls answered with 429.
    pub plays_rate_limited: AtomicU32,
    /// Status for token requests instead of 200, if set.
    pub token_status: Mutex<Option<StatusCode>>,
    /// Whether refresh responses carry a new refresh token.
    pub rotate_refresh_token: Mutex<bool>,

    pub plays_calls: AtomicUsize,
    pub features_calls: AtomicUsize,
    pub token_calls: AtomicUsize,
    pub profile_calls: AtomicUsize,
    /// Bearer tokens seen by recently-played, in order.
    pub bearer_tokens: Mutex<Vec<String>>,
}

impl FakeSpotify {
    #[allow(dead_code)]
    pub fn set_plays(&self, plays: Vec<Value>) {
        *self.plays.lock().unwrap() = plays;
    }

    #[allow(dead_code)]
    pub fn set_features(&self, features: Vec<Value>) {
        *self.features.lock().unwrap() = features;
    }

    #[allow(dead_code)]
    pub fn set_token_status(&self, status: StatusCode) {
        *self.token_status.lock().unwrap() = Some(status);
    }

    #[allow(dead_code)]
    pub fn set_plays_status(&self, status: StatusCode) {
        *self.plays_status.lock().unwrap() = Some(status);
    }

    #[allow(dead_code)]
    pub fn calls(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Start the fake API. Returns its base URL.
#[allow(dead_code)]
pub async fn spawn_fake_spotify() -> (String, Arc<FakeSpotify>) {
    let fake = Arc::new(FakeSpotify::default());

    let app = Router::new()
        .route("/v1/me/player/recently-played", get(recently_played))
        .route("/v1/audio-features", get(audio_features))
        .route("/v1/me", get(profile))
        .route("/api/token", post(token))
        .with_state(fake.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), fake)
}

async fn recently_played(
    State(fake): State<Arc<FakeSpotify>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    fake.plays_calls.fetch_add(1, Ordering::SeqCst);

    if let Some(token) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        fake.bearer_tokens.lock().unwrap().push(token.to_string());
    }

    if fake
        .plays_rate_limited
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
    {
        return (StatusCode::TOO_MANY_REQUESTS, [(header::RETRY_AFTER, "0")]).into_response();
    }

    if let Some(status) = *fake.plays_status.lock().unwrap() {
        return status.into_response();
    }

    let limit: usize = query
        .get("limit")
        .and_then(|v| v.parse().ok())
        .unwrap_or(20);
    let items: Vec<Value> = fake.plays.lock().unwrap().iter().take(limit).cloned().collect();

    Json(json!({ "items": items, "limit": limit })).into_response()
}

async fn audio_features(
    State(fake): State<Arc<FakeSpotify>>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    fake.features_calls.fetch_add(1, Ordering::SeqCst);

    let ids: Vec<&str> = query
        .get("ids")
        .map(|v| v.split(',').collect())
        .unwrap_or_default();

    // Spotify answers null for ids it has no features for
    let features = fake.features.lock().unwrap();
    let found: Vec<Value> = ids
        .iter()
        .map(|id| {
            features
                .iter()
                .find(|f| f["id"] == *id)
                .cloned()
                .unwrap_or(Value::Null)
        })
        .collect();

    Json(json!({ "audio_features": found })).into_response()
}

async fn profile(State(fake): State<Arc<FakeSpotify>>) -> Response {
    fake.profile_calls.fetch_add(1, Ordering::SeqCst);
    Json(json!({ "id": "U", "display_name": "Ulla", "type": "user" })).into_response()
}

async fn token(
    State(fake): State<Arc<FakeSpotify>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let n = fake.token_calls.fetch_add(1, Ordering::SeqCst) + 1;

    if let Some(status) = *fake.token_status.lock().unwrap() {
        let body = if status == StatusCode::BAD_REQUEST {
            json!({ "error": "invalid_grant", "error_description": "Refresh token revoked" })
        } else {
            json!({ "error": "server_error" })
        };
        return (status, Json(body)).into_response();
    }

    if form.get("client_id").map(String::as_str) != Some("test_client_id") {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "invalid_client" })))
            .into_response();
    }

    let mut body = json!({
        "access_token": format!("access-{}", n),
        "token_type": "Bearer",
        "expires_in": 3600,
        "scope": "user-read-recently-played",
    });

    let issue_refresh = form.get("grant_type").map(String::as_str) == Some("authorization_code")
        || *fake.rotate_refresh_token.lock().unwrap();
    if issue_refresh {
        body["refresh_token"] = json!(format!("refresh-{}", n));
    }

    Json(body).into_response()
}

// ─── Downstream collector ────────────────────────────────────

/// Event collector that holds every publish request for `delay`.
#[derive(Default)]
pub struct SlowSink {
    pub delay: Duration,
    /// Publish requests received so far, including ones still held.
    pub started: AtomicUsize,
    pub batches: Mutex<Vec<Value>>,
}

impl SlowSink {
    #[allow(dead_code)]
    pub fn batch_count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }
}

/// Start a collector. Returns the URL to publish to.
#[allow(dead_code)]
pub async fn spawn_slow_sink(delay: Duration) -> (String, Arc<SlowSink>) {
    let sink = Arc::new(SlowSink {
        delay,
        ..Default::default()
    });

    let app = Router::new()
        .route("/events", post(collect))
        .with_state(sink.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}/events", addr), sink)
}

async fn collect(State(sink): State<Arc<SlowSink>>, Json(batch): Json<Value>) -> StatusCode {
    sink.started.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(sink.delay).await;
    sink.batches.lock().unwrap().push(batch);
    StatusCode::OK
}

// ─── Fixtures ────────────────────────────────────────────────

#[allow(dead_code)]
pub fn play(track_id: &str, played_at: &str) -> Value {
    json!({
        "track": {
            "id": track_id,
            "name": format!("Track {}", track_id),
            "artists": [{ "id": "A1", "name": "Artist One" }],
            "duration_ms": 200_000,
            "preview_url": null,
        },
        "played_at": played_at,
        "context": null,
    })
}

#[allow(dead_code)]
pub fn features(track_id: &str) -> Value {
    json!({
        "id": track_id,
        "acousticness": 0.25,
        "danceability": 0.7,
        "energy": 0.8,
        "instrumentalness": 0.0,
        "key": 2,
        "liveness": 0.1,
        "loudness": -4.5,
        "mode": 1,
        "speechiness": 0.03,
        "tempo": 124.0,
        "time_signature": 4,
        "valence": 0.6,
        "type": "audio_features",
    })
}

#[allow(dead_code)]
pub fn client() -> ClientCredentials {
    ClientCredentials::new("test_client_id", "test_secret").unwrap()
}

#[allow(dead_code)]
pub fn user(user_id: &str) -> UserCredentials {
    UserCredentials::new(
        user_id,
        Some("Ulla".to_string()),
        "access-0",
        "refresh-0",
        client(),
    )
    .unwrap()
}

// ─── Services ────────────────────────────────────────────────

/// Spotify service against `base_url` with the given retry budget.
#[allow(dead_code)]
pub fn spotify_service(base_url: &str, max_retries: u32) -> SpotifyService {
    let config = Config::test_default(base_url);
    SpotifyService::new(
        SpotifyClient::new(&config.spotify_api_url, &config.spotify_accounts_url),
        ResilientApiClient::new(max_retries),
    )
}

#[allow(dead_code)]
pub fn harvest_service(base_url: &str) -> EventHarvestService {
    let cache = DedupCache::new(MAX_RECENTLY_PLAYED as usize).unwrap();
    EventHarvestService::new(spotify_service(base_url, 2), cache)
}

#[allow(dead_code)]
pub fn auth_service(base_url: &str) -> AuthorizationService {
    let config = Config::test_default(base_url);
    AuthorizationService::new(
        spotify_service(base_url, 0),
        CredentialStore::in_memory(client()),
        &config,
    )
}

/// Poll scheduler with a short period publishing to a channel.
#[allow(dead_code)]
pub fn test_scheduler(
    base_url: &str,
    period: Duration,
) -> (PollScheduler, mpsc::UnboundedReceiver<PublishedBatch>) {
    let (publisher, rx) = EventPublisher::channel();
    let scheduler = scheduler_with(auth_service(base_url), publisher, base_url, period);
    (scheduler, rx)
}

/// Poll scheduler with a short period publishing through `publisher`.
#[allow(dead_code)]
pub fn scheduler_with_publisher(
    base_url: &str,
    period: Duration,
    publisher: EventPublisher,
) -> PollScheduler {
    scheduler_with(auth_service(base_url), publisher, base_url, period)
}

fn scheduler_with(
    auth: AuthorizationService,
    publisher: EventPublisher,
    base_url: &str,
    period: Duration,
) -> PollScheduler {
    let (shutdown_tx, _) = watch::channel(false);

    let ctx = PollContext {
        auth,
        harvest: harvest_service(base_url),
        publisher,
        settings: PollSettings::new(period, 20).unwrap(),
    };

    PollScheduler::new(ctx, shutdown_tx)
}

/// Create a test app against the fake API.
/// Returns the router, the shared state and the publish channel.
#[allow(dead_code)]
pub fn create_test_app(
    base_url: &str,
) -> (
    axum::Router,
    Arc<AppState>,
    mpsc::UnboundedReceiver<PublishedBatch>,
) {
    let config = Config::test_default(base_url);
    let auth = auth_service(base_url);
    let (publisher, rx) = EventPublisher::channel();
    let scheduler = scheduler_with(auth.clone(), publisher, base_url, config.poll.period);

    let state = Arc::new(AppState {
        config,
        store: auth.store().clone(),
        auth,
        scheduler: Arc::new(scheduler),
    });

    (create_router(state.clone()), state, rx)
}
