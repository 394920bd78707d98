//! Application configuration loaded from environment variables.
//!
//! Client credentials are app-level and shared by every user; they are read
//! once at startup and never change for the life of the process.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// The most plays the recently-played endpoint returns for one query.
pub const MAX_RECENTLY_PLAYED: u32 = 50;

/// Default interval between polls for one user (10 minutes).
pub const DEFAULT_POLL_PERIOD: Duration = Duration::from_secs(10 * 60);

/// Additional attempts after the first when upstream rate-limits us.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Spotify OAuth client ID (public)
    pub spotify_client_id: String,
    /// Spotify OAuth client secret
    pub spotify_client_secret: String,
    /// HMAC key used to sign OAuth state values
    pub oauth_state_key: Vec<u8>,
    /// Externally reachable base URL, used to build the OAuth redirect URI
    pub public_url: String,
    /// Server port
    pub port: u16,
    /// Spotify Web API base URL
    pub spotify_api_url: String,
    /// Spotify accounts service base URL (token endpoint, authorize page)
    pub spotify_accounts_url: String,
    /// Space-separated OAuth scopes requested from users
    pub spotify_scopes: String,
    /// Poll cadence and fetch size
    pub poll: PollSettings,
    /// Retry budget for rate-limited upstream calls
    pub api_max_retries: u32,
    /// Where user credentials are persisted
    pub credentials_path: PathBuf,
    /// Optional snapshot file for the dedup cache
    pub dedup_snapshot_path: Option<PathBuf>,
    /// Optional downstream endpoint; events go to the log sink when unset
    pub publish_url: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let poll_period = match env::var("POLL_PERIOD_SECS") {
            Ok(v) => Duration::from_secs(
                v.trim()
                    .parse()
                    .map_err(|_| ConfigError::Invalid("POLL_PERIOD_SECS", v.clone()))?,
            ),
            Err(_) => DEFAULT_POLL_PERIOD,
        };

        Ok(Self {
            spotify_client_id: env::var("SPOTIFY_CLIENT_ID")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("SPOTIFY_CLIENT_ID"))?,
            spotify_client_secret: env::var("SPOTIFY_CLIENT_SECRET")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("SPOTIFY_CLIENT_SECRET"))?,
            oauth_state_key: env::var("OAUTH_STATE_KEY")
                .map_err(|_| ConfigError::Missing("OAUTH_STATE_KEY"))?
                .into_bytes(),
            public_url: env::var("PUBLIC_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            spotify_api_url: env::var("SPOTIFY_API_URL")
                .unwrap_or_else(|_| "https://api.spotify.com/v1".to_string()),
            spotify_accounts_url: env::var("SPOTIFY_ACCOUNTS_URL")
                .unwrap_or_else(|_| "https://accounts.spotify.com".to_string()),
            spotify_scopes: env::var("SPOTIFY_SCOPES")
                .unwrap_or_else(|_| "user-read-recently-played".to_string()),
            poll: PollSettings::from_period(poll_period)?,
            api_max_retries: match env::var("API_MAX_RETRIES") {
                Ok(v) => v
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::Invalid("API_MAX_RETRIES", v.clone()))?,
                Err(_) => DEFAULT_MAX_RETRIES,
            },
            credentials_path: env::var("CREDENTIALS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/credentials.json")),
            dedup_snapshot_path: env::var("DEDUP_SNAPSHOT_PATH").ok().map(PathBuf::from),
            publish_url: env::var("PUBLISH_URL").ok().filter(|v| !v.trim().is_empty()),
        })
    }

    /// Config for tests, pointing every upstream URL at `base_url`.
    pub fn test_default(base_url: &str) -> Self {
        Self {
            spotify_client_id: "test_client_id".to_string(),
            spotify_client_secret: "test_secret".to_string(),
            oauth_state_key: b"test_state_key_32_bytes_minimum!".to_vec(),
            public_url: "http://localhost:8080".to_string(),
            port: 8080,
            spotify_api_url: format!("{}/v1", base_url),
            spotify_accounts_url: base_url.to_string(),
            spotify_scopes: "user-read-recently-played".to_string(),
            poll: PollSettings {
                period: DEFAULT_POLL_PERIOD,
                count: 20,
            },
            api_max_retries: DEFAULT_MAX_RETRIES,
            credentials_path: PathBuf::from("data/credentials.json"),
            dedup_snapshot_path: None,
            publish_url: None,
        }
    }

    /// Redirect URI registered with Spotify for the authorization code flow.
    pub fn redirect_uri(&self) -> String {
        format!("{}/auth/spotify/callback", self.public_url)
    }
}

/// Cadence and fetch size of the recurring per-user poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Interval between ticks; the first tick fires one period after registration.
    pub period: Duration,
    /// Plays requested per tick.
    pub count: u32,
}

impl PollSettings {
    /// Build settings with an explicit fetch count.
    pub fn new(period: Duration, count: u32) -> Result<Self, ConfigError> {
        if period.is_zero() {
            return Err(ConfigError::Invalid("POLL_PERIOD_SECS", "0".to_string()));
        }
        if !(1..=MAX_RECENTLY_PLAYED).contains(&count) {
            return Err(ConfigError::Invalid("poll count", count.to_string()));
        }
        Ok(Self { period, count })
    }

    /// Derive the fetch count from the period.
    ///
    /// Spotify only counts a play after roughly 30 seconds of listening, so a
    /// poll can see at most two plays per minute of its period.
    pub fn from_period(period: Duration) -> Result<Self, ConfigError> {
        let minutes = period.as_secs() / 60;
        let count = u32::try_from(minutes * 2).unwrap_or(u32::MAX);
        Self::new(period, count)
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            period: DEFAULT_POLL_PERIOD,
            count: 20,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}
