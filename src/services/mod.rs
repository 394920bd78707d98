// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod authorization;
pub mod harvest;
pub mod poll;
pub mod publisher;
pub mod resilient;
pub mod spotify;

pub use authorization::AuthorizationService;
pub use harvest::EventHarvestService;
pub use poll::{PollContext, PollHandle, PollScheduler, PollState, PollStatus, TickOutcome};
pub use publisher::{EventPublisher, PublishedBatch};
pub use resilient::ResilientApiClient;
pub use spotify::{ApiError, SpotifyClient, SpotifyService};
