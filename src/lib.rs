//! Blob portal library -- a JSON/streaming API over one Azure Blob Storage
//! container.
//!
//! This crate provides the HTTP surface the admin portal talks to: folder
//! listings under virtual prefixes, streamed uploads and downloads,
//! copy/move with a service-side fast path, and version history, plus the
//! Azure REST client and an in-memory store behind them.

pub mod auth;
pub mod blobs;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod metrics;
pub mod paths;
pub mod retry;
pub mod server;
pub mod storage;

use crate::blobs::BlobService;
use crate::config::Config;

/// Shared application state passed to all handlers via `axum::extract::State`.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Blob operations over the configured store.
    pub blobs: BlobService,
}
