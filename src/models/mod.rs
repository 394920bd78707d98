// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod credentials;
pub mod listened;

pub use credentials::{ClientCredentials, StoredCredentials, UserCredentials};
pub use listened::{dedup_key, ListenedEvent};
