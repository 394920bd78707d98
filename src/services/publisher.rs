// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Publish boundary for new listened events.
//!
//! One call per poll tick with a non-empty batch. Failures are reported to
//! the caller and never retried here.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::{AppError, Result};
use crate::models::ListenedEvent;

/// Topic name events are published under.
pub const LISTENED_TRACKS_TOPIC: &str = "listened_tracks";

/// One user's batch of events from a single tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishedBatch {
    pub user_id: String,
    pub events: Vec<ListenedEvent>,
}

/// Where published events go.
#[derive(Clone)]
pub enum EventPublisher {
    /// Structured log records, one per event.
    Log,
    /// JSON POST of the whole batch to a downstream collector.
    Http { http: reqwest::Client, url: String },
    /// In-process channel.
    Channel(mpsc::UnboundedSender<PublishedBatch>),
}

impl EventPublisher {
    pub fn http(url: impl Into<String>) -> Self {
        EventPublisher::Http {
            http: reqwest::Client::new(),
            url: url.into(),
        }
    }

    /// Publisher feeding a channel, plus the receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PublishedBatch>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventPublisher::Channel(tx), rx)
    }

    /// Publish `events` for `user_id` as one batch.
    pub async fn publish(&self, user_id: &str, events: &[ListenedEvent]) -> Result<()> {
        if events.is_empty() {
            return Err(AppError::invalid("publish batch must not be empty"));
        }

        match self {
            EventPublisher::Log => {
                for event in events {
                    tracing::info!(
                        topic = LISTENED_TRACKS_TOPIC,
                        key = %event.key,
                        user_id = %event.user_id,
                        track_id = %event.track_id,
                        played_at = event.played_at,
                        name = %event.name,
                        "Published listened track"
                    );
                }
            }
            EventPublisher::Http { http, url } => {
                let batch = PublishedBatch {
                    user_id: user_id.to_string(),
                    events: events.to_vec(),
                };
                let response = http
                    .post(url)
                    .json(&batch)
                    .send()
                    .await
                    .map_err(|e| AppError::Publish(format!("POST {} failed: {}", url, e)))?;

                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(AppError::Publish(format!("HTTP {}: {}", status, body)));
                }
            }
            EventPublisher::Channel(tx) => {
                tx.send(PublishedBatch {
                    user_id: user_id.to_string(),
                    events: events.to_vec(),
                })
                .map_err(|_| AppError::Publish("Event channel closed".to_string()))?;
            }
        }

        tracing::info!(user_id, count = events.len(), "Published listened tracks");
        Ok(())
    }
}
