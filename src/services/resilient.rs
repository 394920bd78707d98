// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Retry policy shared by every upstream call.
//!
//! Status handling:
//! - 429: sleep for the server's `Retry-After` plus one second (Spotify rounds
//!   the hint down), then retry while the budget lasts. An exhausted budget
//!   yields `Ok(None)`.
//! - 401: `Err(AppError::Unauthorized)` at once for authenticated calls. The
//!   caller should refresh credentials or give up, not retry.
//! - Anything else: `Ok(None)`, no retry.
//!
//! A backoff sleep runs on the calling task. If process shutdown is signalled
//! during the sleep, the remaining retries are abandoned and
//! `Err(AppError::Interrupted)` is returned.

use crate::config::DEFAULT_MAX_RETRIES;
use crate::error::{AppError, Result};
use crate::services::spotify::ApiError;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;

/// Whether a call carries user tokens, which decides how a 401 is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Authenticated,
    Unauthenticated,
}

/// Executes upstream operations under the retry policy above.
#[derive(Clone)]
pub struct ResilientApiClient {
    max_retries: u32,
    shutdown: Option<watch::Receiver<bool>>,
}

impl Default for ResilientApiClient {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

impl ResilientApiClient {
    /// Client with `max_retries` additional attempts after the first.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            shutdown: None,
        }
    }

    /// Abort backoff sleeps once `shutdown` turns `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Run a call made with user tokens. A 401 becomes `Unauthorized`.
    pub async fn execute_authenticated<T, F, Fut>(&self, op: F) -> Result<Option<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ApiError>>,
    {
        self.execute(op, Access::Authenticated).await
    }

    /// Run a call made without user tokens. A 401 is just another failure.
    pub async fn execute_unauthenticated<T, F, Fut>(&self, op: F) -> Result<Option<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ApiError>>,
    {
        self.execute(op, Access::Unauthenticated).await
    }

    async fn execute<T, F, Fut>(&self, mut op: F, access: Access) -> Result<Option<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ApiError>>,
    {
        let mut retries_left = self.max_retries;

        loop {
            match op().await {
                Ok(value) => return Ok(Some(value)),
                Err(ApiError::RateLimited { retry_after_secs }) => {
                    if retries_left == 0 {
                        tracing::error!("Unable to execute Spotify request, no retries left");
                        return Ok(None);
                    }
                    let wait = backoff_delay(retry_after_secs);
                    tracing::info!(
                        wait_secs = wait.as_secs(),
                        retries_left,
                        "Spotify returned Too Many Requests, waiting before retry"
                    );
                    retries_left -= 1;
                    self.sleep(wait).await?;
                }
                Err(ApiError::Unauthorized) if access == Access::Authenticated => {
                    tracing::warn!("Spotify request rejected as unauthorized");
                    return Err(AppError::Unauthorized);
                }
                Err(e) => {
                    tracing::error!(error = %e, ?access, "Spotify request failed");
                    return Ok(None);
                }
            }
        }
    }

    async fn sleep(&self, wait: Duration) -> Result<()> {
        let Some(shutdown) = &self.shutdown else {
            tokio::time::sleep(wait).await;
            return Ok(());
        };

        let mut shutdown = shutdown.clone();
        let stopped = async move {
            // A dropped sender can never signal, so wait out the full sleep.
            if shutdown.wait_for(|stop| *stop).await.is_err() {
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(wait) => Ok(()),
            _ = stopped => {
                tracing::warn!("Spotify retry interrupted by shutdown");
                Err(AppError::Interrupted)
            }
        }
    }
}

/// Sleep for a rate-limited request: the server hint plus one second.
pub fn backoff_delay(retry_after_secs: u64) -> Duration {
    Duration::from_secs(retry_after_secs.saturating_add(1))
}
