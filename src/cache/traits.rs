//! Core traits and types for the photo cache.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::SyncError;

/// A photo that is safe to show offline, as long as its blob still exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
  /// Stable identifier from the remote source
  pub id: String,
  /// Handle the blob cache resolves to the downloaded bytes
  #[serde(rename = "uri")]
  pub local_ref: String,
}

impl CacheRecord {
  pub fn new(id: impl Into<String>, local_ref: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      local_ref: local_ref.into(),
    }
  }
}

/// Ordered list of cache records, unique by `id`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
  records: Vec<CacheRecord>,
}

impl Manifest {
  pub fn new() -> Self {
    Self::default()
  }

  /// Build a manifest, keeping the first position of any repeated id.
  pub fn from_records(records: impl IntoIterator<Item = CacheRecord>) -> Self {
    let mut manifest = Self::new();
    for record in records {
      manifest.upsert(record);
    }
    manifest
  }

  pub fn records(&self) -> &[CacheRecord] {
    &self.records
  }

  pub fn into_records(self) -> Vec<CacheRecord> {
    self.records
  }

  pub fn len(&self) -> usize {
    self.records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }

  pub fn contains(&self, id: &str) -> bool {
    self.records.iter().any(|r| r.id == id)
  }

  /// Insert a record, or update the local ref of an existing one in place.
  ///
  /// Returns `true` if the record was new.
  pub fn upsert(&mut self, record: CacheRecord) -> bool {
    match self.records.iter_mut().find(|r| r.id == record.id) {
      Some(existing) => {
        existing.local_ref = record.local_ref;
        false
      }
      None => {
        self.records.push(record);
        true
      }
    }
  }

  /// Merge one page of freshly cached records.
  ///
  /// Page 1 replaces everything (refresh to latest), later pages append.
  pub fn merge_page(&mut self, page: u32, records: Vec<CacheRecord>) {
    if page <= 1 {
      *self = Self::from_records(records);
      return;
    }
    for record in records {
      self.upsert(record);
    }
  }
}

/// A manifest read back from the manifest store.
#[derive(Debug, Clone)]
pub struct StoredManifest {
  pub manifest: Manifest,
  /// When the manifest was last written
  pub saved_at: DateTime<Utc>,
}

/// One photo as reported by the remote source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteItem {
  pub id: String,
  /// Where the image bytes can be downloaded from
  pub remote_locator: String,
  pub title: Option<String>,
}

/// Fetches pages of photo metadata from the remote service.
#[async_trait]
pub trait RemoteSource: Send + Sync {
  /// Fetch one page. Items without a downloadable image are already
  /// filtered out.
  async fn fetch_page(&self, page: u32, page_size: u32) -> Result<Vec<RemoteItem>, SyncError>;
}

/// Reports network reachability. Asked afresh on every sync.
#[async_trait]
pub trait Connectivity: Send + Sync {
  async fn is_connected(&self) -> bool;
}

/// Where the items of a [`SyncResult`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
  /// Fresh data from the remote source
  Fresh,
  /// Served from the on-disk manifest
  Cached,
  /// Nothing to show
  Empty,
}

impl fmt::Display for SyncMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Fresh => write!(f, "fresh"),
      Self::Cached => write!(f, "cached"),
      Self::Empty => write!(f, "empty"),
    }
  }
}

/// Why a result was served from the local cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradedReason {
  /// Connectivity check said the network is down
  Offline,
  /// The network was up but the remote source failed
  RemoteFailed,
}

/// Outcome of one page request.
#[derive(Debug, Clone)]
pub struct SyncResult {
  /// Everything currently displayable, in order
  pub items: Vec<CacheRecord>,
  pub mode: SyncMode,
  /// Page number the next request should ask for
  pub next_page: u32,
  /// Served from the local cache instead of the remote source
  pub degraded: bool,
  pub reason: Option<DegradedReason>,
  /// When the served manifest was written (cached results only)
  pub saved_at: Option<DateTime<Utc>>,
}

impl SyncResult {
  /// Create a result from a successful online sync of `page`.
  pub fn fresh(items: Vec<CacheRecord>, page: u32) -> Self {
    Self {
      items,
      mode: SyncMode::Fresh,
      next_page: page + 1,
      degraded: false,
      reason: None,
      saved_at: None,
    }
  }

  /// Create a result served from the local cache in degraded mode.
  ///
  /// A non-empty result asks the caller to retry the same page, an empty
  /// one starts over from page 1.
  pub fn degraded(
    items: Vec<CacheRecord>,
    page: u32,
    reason: DegradedReason,
    saved_at: Option<DateTime<Utc>>,
  ) -> Self {
    let (mode, next_page) = if items.is_empty() {
      (SyncMode::Empty, 1)
    } else {
      (SyncMode::Cached, page)
    };
    Self {
      items,
      mode,
      next_page,
      degraded: true,
      reason: Some(reason),
      saved_at,
    }
  }

  /// User-facing retry notice for degraded results.
  pub fn notice(&self) -> Option<&'static str> {
    match (self.mode, self.reason) {
      (SyncMode::Empty, _) if self.degraded => Some("No cached photos available."),
      (_, Some(DegradedReason::Offline)) => Some("You are offline. Showing cached photos."),
      (_, Some(DegradedReason::RemoteFailed)) => {
        Some("Could not reach the photo service. Showing cached photos.")
      }
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn record(id: &str) -> CacheRecord {
    CacheRecord::new(id, format!("/cache/{}.jpg", id))
  }

  fn ids(manifest: &Manifest) -> Vec<&str> {
    manifest.records().iter().map(|r| r.id.as_str()).collect()
  }

  #[test]
  fn test_from_records_dedupes_by_id() {
    let manifest = Manifest::from_records(vec![record("a"), record("b"), record("a")]);
    assert_eq!(ids(&manifest), vec!["a", "b"]);
  }

  #[test]
  fn test_page_one_replaces() {
    let mut manifest = Manifest::from_records(vec![record("a"), record("b")]);
    manifest.merge_page(1, vec![record("c")]);
    assert_eq!(ids(&manifest), vec!["c"]);
  }

  #[test]
  fn test_later_page_appends_without_duplicates() {
    let mut manifest = Manifest::from_records(vec![record("a"), record("b")]);
    manifest.merge_page(2, vec![record("b"), record("c"), record("d")]);
    assert_eq!(ids(&manifest), vec!["a", "b", "c", "d"]);
  }

  #[test]
  fn test_repeated_id_takes_newer_ref() {
    let mut manifest = Manifest::from_records(vec![record("a")]);
    manifest.merge_page(2, vec![CacheRecord::new("a", "/elsewhere/a.jpg")]);
    assert_eq!(manifest.len(), 1);
    assert_eq!(manifest.records()[0].local_ref, "/elsewhere/a.jpg");
  }

  #[test]
  fn test_record_serializes_as_id_and_uri() {
    let json = serde_json::to_string(&record("42")).unwrap();
    assert_eq!(json, r#"{"id":"42","uri":"/cache/42.jpg"}"#);
  }

  #[test]
  fn test_degraded_result_modes() {
    let cached = SyncResult::degraded(vec![record("a")], 3, DegradedReason::Offline, None);
    assert_eq!(cached.mode, SyncMode::Cached);
    assert_eq!(cached.next_page, 3);
    assert!(cached.degraded);

    let empty = SyncResult::degraded(Vec::new(), 3, DegradedReason::RemoteFailed, None);
    assert_eq!(empty.mode, SyncMode::Empty);
    assert_eq!(empty.next_page, 1);
    assert_eq!(empty.notice(), Some("No cached photos available."));
  }

  #[test]
  fn test_fresh_result_has_no_notice() {
    let fresh = SyncResult::fresh(Vec::new(), 1);
    assert_eq!(fresh.mode, SyncMode::Fresh);
    assert_eq!(fresh.next_page, 2);
    assert!(fresh.notice().is_none());
  }
}
