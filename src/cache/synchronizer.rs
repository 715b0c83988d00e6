//! Synchronizer that decides between the remote source and the local cache.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::blobs::BlobCache;
use super::error::SyncError;
use super::storage::ManifestStore;
use super::traits::{
  CacheRecord, Connectivity, DegradedReason, Manifest, RemoteItem, RemoteSource, SyncResult,
};

/// Steps of a single sync, logged as they happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
  CheckingConnectivity,
  FetchingRemote,
  Materializing,
  Merging,
  Persisting,
  LoadingManifest,
  ValidatingRecords,
  Done,
}

impl fmt::Display for SyncPhase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::CheckingConnectivity => "checking-connectivity",
      Self::FetchingRemote => "fetching-remote",
      Self::Materializing => "materializing",
      Self::Merging => "merging",
      Self::Persisting => "persisting",
      Self::LoadingManifest => "loading-manifest",
      Self::ValidatingRecords => "validating-records",
      Self::Done => "done",
    };
    f.write_str(name)
  }
}

/// Manifest records whose blobs are still present.
#[derive(Debug, Clone, Default)]
pub struct ValidatedManifest {
  pub records: Vec<CacheRecord>,
  /// Records dropped because their blob is gone
  pub dropped: usize,
  /// When the manifest was written, if there was one
  pub saved_at: Option<DateTime<Utc>>,
}

/// Outcome of [`CacheSynchronizer::prune`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
  pub records_dropped: usize,
  pub blobs_removed: usize,
  pub partials_removed: usize,
}

/// Releases the in-flight flag when dropped.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

/// Offline-first synchronizer for the photo gallery.
///
/// Answers "give me page N" by fetching from the remote source and caching
/// every photo locally, or by serving the last persisted manifest when the
/// network is unavailable or the remote source fails.
///
/// Only one sync (or prune) runs at a time; overlapping calls are rejected
/// with [`SyncError::Busy`].
pub struct CacheSynchronizer {
  manifests: Arc<dyn ManifestStore>,
  blobs: Arc<dyn BlobCache>,
  remote: Arc<dyn RemoteSource>,
  connectivity: Arc<dyn Connectivity>,
  page_size: u32,
  /// Everything displayed so far, across pages
  current: Mutex<Manifest>,
  in_flight: AtomicBool,
}

impl CacheSynchronizer {
  pub fn new(
    manifests: Arc<dyn ManifestStore>,
    blobs: Arc<dyn BlobCache>,
    remote: Arc<dyn RemoteSource>,
    connectivity: Arc<dyn Connectivity>,
    page_size: u32,
  ) -> Self {
    Self {
      manifests,
      blobs,
      remote,
      connectivity,
      page_size: page_size.max(1),
      current: Mutex::new(Manifest::new()),
      in_flight: AtomicBool::new(false),
    }
  }

  pub fn page_size(&self) -> u32 {
    self.page_size
  }

  /// Whether a sync or prune is currently running.
  #[allow(dead_code)]
  pub fn is_busy(&self) -> bool {
    self.in_flight.load(Ordering::Acquire)
  }

  /// Snapshot of the in-memory set accumulated across pages.
  pub fn current(&self) -> Vec<CacheRecord> {
    self.lock_current().records().to_vec()
  }

  fn lock_current(&self) -> MutexGuard<'_, Manifest> {
    // The manifest is replaced wholesale, a poisoned guard still holds a
    // consistent value.
    self.current.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn acquire(&self) -> Result<InFlight<'_>, SyncError> {
    self
      .in_flight
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .map(|_| InFlight(&self.in_flight))
      .map_err(|_| SyncError::Busy)
  }

  /// Produce page `page` of the gallery.
  ///
  /// Never fails because of the network or local storage: those fall back
  /// to the cached manifest. Errors only with [`SyncError::Busy`] or
  /// [`SyncError::InvalidPage`].
  pub async fn sync(&self, page: u32) -> Result<SyncResult, SyncError> {
    if page == 0 {
      return Err(SyncError::InvalidPage { page });
    }
    let _guard = self.acquire()?;

    debug!(phase = %SyncPhase::CheckingConnectivity, page, "sync started");
    let result = if self.connectivity.is_connected().await {
      match self.sync_online(page).await {
        Ok(result) => result,
        Err(e) => {
          warn!(page, error = %e, "remote sync failed, serving cached photos");
          self.serve_cached(page, DegradedReason::RemoteFailed).await
        }
      }
    } else {
      info!(page, "offline, serving cached photos");
      self.serve_cached(page, DegradedReason::Offline).await
    };

    debug!(
      phase = %SyncPhase::Done,
      page,
      mode = %result.mode,
      items = result.items.len(),
      degraded = result.degraded,
      "sync finished"
    );
    Ok(result)
  }

  async fn sync_online(&self, page: u32) -> Result<SyncResult, SyncError> {
    debug!(phase = %SyncPhase::FetchingRemote, page, page_size = self.page_size, "fetching page");
    let items = self.remote.fetch_page(page, self.page_size).await?;

    debug!(phase = %SyncPhase::Materializing, page, items = items.len(), "caching photos");
    let records = self.materialize_all(&items).await;
    if !items.is_empty() && records.is_empty() {
      return Err(SyncError::fetch(
        format!("page {}", page),
        format!("none of {} photos could be cached", items.len()),
      ));
    }

    // A fresh process starting past page 1 appends to what is on disk.
    let resuming = page > 1 && self.lock_current().is_empty();
    if resuming {
      let validated = self.load_offline().await;
      debug!(page, records = validated.records.len(), "resuming from cached manifest");
      let mut current = self.lock_current();
      if current.is_empty() {
        *current = Manifest::from_records(validated.records);
      }
    }

    debug!(phase = %SyncPhase::Merging, page, records = records.len(), "merging page");
    let merged = {
      let mut current = self.lock_current();
      current.merge_page(page, records);
      current.clone()
    };

    debug!(phase = %SyncPhase::Persisting, page, records = merged.len(), "saving manifest");
    if let Err(e) = self.manifests.save(&merged) {
      // The result stands; the next successful sync writes the manifest again.
      error!(page, error = %e, "failed to persist manifest");
    }

    info!(page, items = merged.len(), "synced photos from remote");
    Ok(SyncResult::fresh(merged.into_records(), page))
  }

  /// Cache every item in remote order, skipping the ones that fail.
  async fn materialize_all(&self, items: &[RemoteItem]) -> Vec<CacheRecord> {
    let mut records = Vec::with_capacity(items.len());
    for item in items {
      match self.blobs.materialize(&item.remote_locator, &item.id).await {
        Ok(local_ref) => {
          debug!(id = %item.id, title = item.title.as_deref().unwrap_or(""), "photo ready");
          records.push(CacheRecord::new(item.id.clone(), local_ref));
        }
        Err(e) => warn!(id = %item.id, error = %e, "image caching failed"),
      }
    }
    records
  }

  /// Degraded path: the on-disk manifest replaces whatever was accumulated
  /// in memory.
  async fn serve_cached(&self, page: u32, reason: DegradedReason) -> SyncResult {
    let validated = self.load_offline().await;
    *self.lock_current() = Manifest::from_records(validated.records.clone());
    SyncResult::degraded(validated.records, page, reason, validated.saved_at)
  }

  /// Load the persisted manifest and keep only records whose blob exists.
  ///
  /// Missing or unreadable manifests yield an empty list. Neither the
  /// network nor the in-memory state is touched.
  pub async fn load_offline(&self) -> ValidatedManifest {
    debug!(phase = %SyncPhase::LoadingManifest, "loading cached manifest");
    let stored = match self.manifests.load() {
      Ok(stored) => stored,
      Err(SyncError::NotFound) => {
        info!("no cached photos available");
        return ValidatedManifest::default();
      }
      Err(e) => {
        warn!(error = %e, "cached manifest is unusable");
        return ValidatedManifest::default();
      }
    };

    debug!(phase = %SyncPhase::ValidatingRecords, records = stored.manifest.len(), "validating records");
    let (records, dropped) = self.validate(stored.manifest).await;
    ValidatedManifest {
      records,
      dropped,
      saved_at: Some(stored.saved_at),
    }
  }

  async fn validate(&self, manifest: Manifest) -> (Vec<CacheRecord>, usize) {
    let mut valid = Vec::with_capacity(manifest.len());
    let mut dropped = 0;
    for record in manifest.into_records() {
      if self.blobs.exists(&record.local_ref).await {
        valid.push(record);
      } else {
        debug!(id = %record.id, "dropping cache record without blob");
        dropped += 1;
      }
    }
    (valid, dropped)
  }

  /// Rewrite the manifest without dangling records and delete blobs that
  /// nothing references.
  ///
  /// A corrupt manifest is replaced by an empty one. Storage errors while
  /// reading the manifest abort before anything is deleted.
  pub async fn prune(&self) -> Result<PruneReport, SyncError> {
    let _guard = self.acquire()?;

    let (manifest, rewrite) = match self.manifests.load() {
      Ok(stored) => (stored.manifest, false),
      Err(SyncError::NotFound) => (Manifest::new(), false),
      Err(e) if e.is_no_offline_data() => {
        warn!(error = %e, "replacing corrupt manifest");
        (Manifest::new(), true)
      }
      Err(e) => return Err(e),
    };

    let (valid, records_dropped) = self.validate(manifest).await;
    if rewrite || records_dropped > 0 {
      self.manifests.save(&Manifest::from_records(valid.clone()))?;
    }

    let referenced: HashSet<String> = valid
      .into_iter()
      .chain(self.current())
      .map(|r| r.local_ref)
      .collect();

    let mut blobs_removed = 0;
    for blob in self.blobs.list_blobs().await? {
      if !referenced.contains(&blob) {
        self.blobs.remove(&blob).await?;
        blobs_removed += 1;
      }
    }
    let partials_removed = self.blobs.sweep_partials().await?;

    let report = PruneReport {
      records_dropped,
      blobs_removed,
      partials_removed,
    };
    info!(?report, "pruned photo cache");
    Ok(report)
  }
}
