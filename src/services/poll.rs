// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Recurring per-user polls.
//!
//! Each registered user gets one tokio task that owns the user's `PollHandle`
//! and runs its ticks one after another. That task is the only writer of the
//! user's credentials and dedup entry, and a tick (including any backoff
//! sleep) always completes before the next one is scheduled.
//!
//! A tick is never cut short by re-registration: a replaced poll is told to
//! stop and exits after its current tick, so a batch already recorded in the
//! dedup cache is still published. Only process shutdown past the grace
//! period aborts a tick.
//!
//! Credential and dedup snapshot writes run on tokio's blocking pool, so a
//! tick's file I/O does not stall the workers driving other users' polls.
//!
//! Per-user state machine:
//!
//! ```text
//! Scheduled -> Refreshing -> Harvesting -> Publishing -> Scheduled
//!                   |
//!                   +-- Unauthorized --> Cancelled (terminal)
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::PollSettings;
use crate::error::AppError;
use crate::models::UserCredentials;
use crate::services::authorization::AuthorizationService;
use crate::services::harvest::EventHarvestService;
use crate::services::publisher::EventPublisher;
use crate::time_utils::format_utc_rfc3339;

/// How long `shutdown` waits for in-flight ticks before aborting them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Where a user's poll currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollState {
    Scheduled,
    Refreshing,
    Harvesting,
    Publishing,
    Cancelled,
}

/// What the poll loop should do after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Wait for the next period.
    Continue,
    /// Credentials were rejected; never tick again.
    Cancelled,
    /// Process shutdown was observed mid-tick.
    Stopped,
}

/// Collaborators shared by every poll.
pub struct PollContext {
    pub auth: AuthorizationService,
    pub harvest: EventHarvestService,
    pub publisher: EventPublisher,
    pub settings: PollSettings,
}

/// One user's live poll state.
pub struct PollHandle {
    credentials: UserCredentials,
    state: watch::Sender<PollState>,
    ctx: Arc<PollContext>,
}

impl PollHandle {
    pub fn new(credentials: UserCredentials, ctx: Arc<PollContext>) -> Self {
        let (state, _) = watch::channel(PollState::Scheduled);
        Self {
            credentials,
            state,
            ctx,
        }
    }

    /// Credentials the next tick will use.
    pub fn credentials(&self) -> &UserCredentials {
        &self.credentials
    }

    pub fn state(&self) -> PollState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PollState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: PollState) {
        self.state.send_replace(state);
    }

    /// Run one refresh, harvest and publish cycle.
    pub async fn tick(&mut self) -> TickOutcome {
        if self.state() == PollState::Cancelled {
            return TickOutcome::Cancelled;
        }

        tracing::debug!(user = %self.credentials, "Polling listened tracks");

        self.set_state(PollState::Refreshing);
        match self.ctx.auth.refresh_user(&self.credentials).await {
            Ok(Some(next)) => self.credentials = next,
            Ok(None) => {}
            Err(AppError::Unauthorized) => {
                tracing::warn!(
                    user = %self.credentials,
                    "Credentials are invalid and cannot be refreshed, cancelling poll"
                );
                self.set_state(PollState::Cancelled);
                return TickOutcome::Cancelled;
            }
            Err(AppError::Interrupted) => return TickOutcome::Stopped,
            Err(e) => {
                tracing::error!(user = %self.credentials, error = %e, "Token refresh failed");
            }
        }

        self.set_state(PollState::Harvesting);
        let events = match self
            .ctx
            .harvest
            .harvest(&self.credentials, self.ctx.settings.count)
            .await
        {
            Ok(events) => events,
            Err(AppError::Interrupted) => return TickOutcome::Stopped,
            Err(AppError::Unauthorized) => {
                tracing::warn!(user = %self.credentials, "Harvest rejected as unauthorized");
                Vec::new()
            }
            Err(e) => {
                tracing::error!(user = %self.credentials, error = %e, "Harvest failed");
                Vec::new()
            }
        };

        if !events.is_empty() {
            self.set_state(PollState::Publishing);
            if let Err(e) = self
                .ctx
                .publisher
                .publish(self.credentials.user_id(), &events)
                .await
            {
                tracing::error!(
                    user = %self.credentials,
                    count = events.len(),
                    error = %e,
                    "Failed to publish listened tracks"
                );
            }
        }

        self.set_state(PollState::Scheduled);
        TickOutcome::Continue
    }
}

/// Snapshot of one registered poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollStatus {
    pub user_id: String,
    pub display_name: Option<String>,
    pub state: PollState,
    pub registered_at: String,
}

struct PollRegistration {
    display_name: Option<String>,
    state: watch::Receiver<PollState>,
    /// Asks this poll alone to stop after its current tick.
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
    registered_at: DateTime<Utc>,
}

/// Owns one recurring poll task per user.
pub struct PollScheduler {
    ctx: Arc<PollContext>,
    polls: DashMap<String, PollRegistration>,
    shutdown: watch::Sender<bool>,
}

impl PollScheduler {
    /// `shutdown` is the process-wide stop signal; the same channel should
    /// feed the `ResilientApiClient` so backoff sleeps are interrupted too.
    pub fn new(ctx: PollContext, shutdown: watch::Sender<bool>) -> Self {
        Self {
            ctx: Arc::new(ctx),
            polls: DashMap::new(),
            shutdown,
        }
    }

    pub fn settings(&self) -> PollSettings {
        self.ctx.settings
    }

    /// Register a recurring poll for `cred`. The first tick fires one full
    /// period from now. Any existing poll for the same user is replaced.
    pub fn add_poll(&self, cred: UserCredentials) {
        if *self.shutdown.borrow() {
            tracing::warn!(user = %cred, "Not scheduling poll during shutdown");
            return;
        }

        let user_id = cred.user_id().to_string();
        let display_name = cred.display_name().map(str::to_string);
        let handle = PollHandle::new(cred, self.ctx.clone());
        let state = handle.subscribe();
        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_poll(
            handle,
            self.ctx.settings.period,
            stop_rx,
            self.shutdown.subscribe(),
        ));

        let registration = PollRegistration {
            display_name,
            state,
            stop,
            task,
            registered_at: Utc::now(),
        };

        if let Some(previous) = self.polls.insert(user_id.clone(), registration) {
            // Dropping the JoinHandle detaches the task; it exits on its own.
            previous.stop.send_replace(true);
            tracing::info!(user_id = %user_id, "Replaced existing poll");
        }

        tracing::info!(
            user_id = %user_id,
            period_secs = self.ctx.settings.period.as_secs(),
            count = self.ctx.settings.count,
            "Scheduled listened track poll"
        );
    }

    /// Current state of `user_id`'s poll.
    pub fn poll_state(&self, user_id: &str) -> Option<PollState> {
        self.polls.get(user_id).map(|reg| *reg.state.borrow())
    }

    /// Watch `user_id`'s poll state changes.
    pub fn subscribe(&self, user_id: &str) -> Option<watch::Receiver<PollState>> {
        self.polls.get(user_id).map(|reg| reg.state.clone())
    }

    /// All registered polls, ordered by user id.
    pub fn polls(&self) -> Vec<PollStatus> {
        let mut all: Vec<PollStatus> = self
            .polls
            .iter()
            .map(|entry| PollStatus {
                user_id: entry.key().clone(),
                display_name: entry.display_name.clone(),
                state: *entry.state.borrow(),
                registered_at: format_utc_rfc3339(entry.registered_at),
            })
            .collect();
        all.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        all
    }

    /// Number of polls that are still running.
    pub fn active_count(&self) -> usize {
        self.polls
            .iter()
            .filter(|entry| !entry.task.is_finished() && *entry.state.borrow() != PollState::Cancelled)
            .count()
    }

    /// Stop every poll and wait for in-flight ticks to finish.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);

        let user_ids: Vec<String> = self.polls.iter().map(|e| e.key().clone()).collect();
        let mut tasks = Vec::with_capacity(user_ids.len());
        for user_id in user_ids {
            if let Some((_, reg)) = self.polls.remove(&user_id) {
                tasks.push(reg.task);
            }
        }

        let count = tasks.len();
        let aborts: Vec<_> = tasks.iter().map(|t| t.abort_handle()).collect();
        if tokio::time::timeout(SHUTDOWN_GRACE, futures_util::future::join_all(tasks))
            .await
            .is_err()
        {
            tracing::warn!("Polls did not stop in time, aborting");
            for abort in aborts {
                abort.abort();
            }
        }

        tracing::info!(count, "All polls stopped");
    }
}

async fn run_poll(
    mut handle: PollHandle,
    period: Duration,
    mut stop: watch::Receiver<bool>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // Stop signals win over a tick that is already due
        tokio::select! {
            biased;
            _ = stop_requested(&mut shutdown) => break,
            _ = stop_requested(&mut stop) => {
                tracing::debug!(user_id = %handle.credentials().user_id(), "Replaced poll exiting");
                break;
            }
            _ = interval.tick() => {}
        }

        match handle.tick().await {
            TickOutcome::Continue => {}
            TickOutcome::Cancelled => break,
            TickOutcome::Stopped => {
                tracing::info!(user_id = %handle.credentials().user_id(), "Poll stopped by shutdown");
                break;
            }
        }
    }
}

/// Resolves once `signal` turns `true`. A dropped sender never resolves.
async fn stop_requested(signal: &mut watch::Receiver<bool>) {
    if signal.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
