// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Cairn Authors

//! API request handlers.

use std::sync::Arc;

use crate::cluster::Cluster;

pub mod bucket;
pub mod cluster;
pub mod object;
pub mod xaction;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The cluster served by this router.
    pub cluster: Arc<Cluster>,
}
