//! Offline-first photo cache.
//!
//! This module keeps the gallery usable without a network:
//! - Downloads every displayed photo into a local blob cache
//! - Persists a manifest of cached photos after each successful page
//! - Serves the manifest, minus photos whose files disappeared, when the
//!   network is down or the remote source fails

mod blobs;
mod error;
mod storage;
mod synchronizer;
mod traits;

pub use blobs::{BlobCache, FsBlobCache, HttpFetcher};
pub use error::SyncError;
pub use storage::{ManifestStore, SqliteStorage};
pub use synchronizer::{CacheSynchronizer, PruneReport, ValidatedManifest};
pub use traits::{
  CacheRecord, Connectivity, DegradedReason, RemoteItem, RemoteSource, SyncMode, SyncResult,
};
