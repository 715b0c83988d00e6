//! Blob cache: one file per photo under a single directory.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, warn};

use super::error::SyncError;

const BLOB_EXTENSION: &str = "jpg";
const PARTIAL_EXTENSION: &str = "part";

/// Local store of downloaded photo bytes, keyed by photo id.
#[async_trait]
pub trait BlobCache: Send + Sync {
  /// Whether the blob behind `local_ref` is present. Never errors; an
  /// unreadable blob counts as absent.
  async fn exists(&self, local_ref: &str) -> bool;

  /// Download `remote_locator` for `id` unless it is already cached.
  ///
  /// Returns the local ref. A failed download leaves nothing behind.
  async fn materialize(&self, remote_locator: &str, id: &str) -> Result<String, SyncError>;

  /// Local refs of every blob on disk, referenced or not.
  async fn list_blobs(&self) -> Result<Vec<String>, SyncError>;

  /// Delete one blob. Deleting a missing blob is not an error.
  async fn remove(&self, local_ref: &str) -> Result<(), SyncError>;

  /// Delete leftovers of interrupted downloads. Returns how many.
  async fn sweep_partials(&self) -> Result<usize, SyncError>;
}

/// Downloads raw bytes for a remote locator.
#[async_trait]
pub trait BlobFetcher: Send + Sync {
  async fn fetch(&self, remote_locator: &str) -> Result<Vec<u8>, SyncError>;
}

/// Fetches blobs over HTTP.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new(timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(concat!("photosync/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl BlobFetcher for HttpFetcher {
  async fn fetch(&self, remote_locator: &str) -> Result<Vec<u8>, SyncError> {
    let response = self
      .client
      .get(remote_locator)
      .send()
      .await
      .and_then(|r| r.error_for_status())
      .map_err(SyncError::network)?;

    let bytes = response.bytes().await.map_err(SyncError::network)?;
    Ok(bytes.to_vec())
  }
}

/// Blob cache on the local filesystem.
///
/// Each photo is stored as `<id>.jpg` under `root`. Downloads land in
/// `<id>.jpg.part` first and are renamed into place once complete, so a
/// file with the final name is always a complete download.
#[derive(Clone)]
pub struct FsBlobCache {
  root: PathBuf,
  fetcher: Arc<dyn BlobFetcher>,
}

impl FsBlobCache {
  /// Create a blob cache rooted at `root`, creating the directory if needed.
  pub fn new(root: impl Into<PathBuf>, fetcher: Arc<dyn BlobFetcher>) -> Result<Self> {
    let root = root.into();
    // Once at start-up, not worth making the constructor async.
    std::fs::create_dir_all(&root)
      .map_err(|e| eyre!("Failed to create blob directory {}: {}", root.display(), e))?;

    Ok(Self { root, fetcher })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Deterministic file name for a photo id.
  ///
  /// Ids that are safe as file names are used verbatim, anything else is
  /// replaced by its SHA-256 digest.
  pub fn file_name(id: &str) -> String {
    let safe = !id.is_empty()
      && id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if safe {
      format!("{}.{}", id, BLOB_EXTENSION)
    } else {
      let mut hasher = Sha256::new();
      hasher.update(id.as_bytes());
      format!("{}.{}", hex::encode(hasher.finalize()), BLOB_EXTENSION)
    }
  }

  fn blob_path(&self, id: &str) -> PathBuf {
    self.root.join(Self::file_name(id))
  }

  fn local_ref(path: &Path) -> String {
    path.to_string_lossy().into_owned()
  }

  fn is_within_root(&self, path: &Path) -> bool {
    path.parent() == Some(self.root.as_path())
  }

  async fn write_atomically(&self, path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut partial = path.as_os_str().to_owned();
    partial.push(".");
    partial.push(PARTIAL_EXTENSION);
    let partial = PathBuf::from(partial);

    let written = async {
      fs::write(&partial, data).await?;
      fs::rename(&partial, path).await
    }
    .await;

    if written.is_err() {
      let _ = fs::remove_file(&partial).await;
    }
    written
  }
}

#[async_trait]
impl BlobCache for FsBlobCache {
  async fn exists(&self, local_ref: &str) -> bool {
    match fs::metadata(local_ref).await {
      Ok(metadata) => metadata.is_file(),
      Err(_) => false,
    }
  }

  async fn materialize(&self, remote_locator: &str, id: &str) -> Result<String, SyncError> {
    let path = self.blob_path(id);
    let local_ref = Self::local_ref(&path);

    if self.exists(&local_ref).await {
      debug!(id, "photo already cached");
      return Ok(local_ref);
    }

    let data = self
      .fetcher
      .fetch(remote_locator)
      .await
      .map_err(|e| SyncError::fetch(id, e))?;

    if data.is_empty() {
      return Err(SyncError::fetch(id, "empty response body"));
    }

    self
      .write_atomically(&path, &data)
      .await
      .map_err(|e| SyncError::fetch(id, e))?;

    debug!(id, bytes = data.len(), "photo cached");
    Ok(local_ref)
  }

  async fn list_blobs(&self) -> Result<Vec<String>, SyncError> {
    let mut entries = fs::read_dir(&self.root).await?;
    let mut blobs = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
      let path = entry.path();
      if path.extension().and_then(|e| e.to_str()) != Some(BLOB_EXTENSION) {
        continue;
      }
      if entry.file_type().await?.is_file() {
        blobs.push(Self::local_ref(&path));
      }
    }

    blobs.sort();
    Ok(blobs)
  }

  async fn remove(&self, local_ref: &str) -> Result<(), SyncError> {
    let path = Path::new(local_ref);
    if !self.is_within_root(path) {
      return Err(SyncError::io(format!(
        "refusing to remove {} outside of {}",
        local_ref,
        self.root.display()
      )));
    }

    match fs::remove_file(path).await {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(e.into()),
    }
  }

  async fn sweep_partials(&self) -> Result<usize, SyncError> {
    let mut entries = fs::read_dir(&self.root).await?;
    let mut removed = 0;

    while let Some(entry) = entries.next_entry().await? {
      let path = entry.path();
      if path.extension().and_then(|e| e.to_str()) != Some(PARTIAL_EXTENSION) {
        continue;
      }
      match fs::remove_file(&path).await {
        Ok(()) => removed += 1,
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove partial download"),
      }
    }

    Ok(removed)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;
  use std::sync::atomic::{AtomicUsize, Ordering};

  /// Serves canned bodies and counts downloads.
  #[derive(Default)]
  struct FakeFetcher {
    bodies: HashMap<String, Vec<u8>>,
    calls: AtomicUsize,
  }

  impl FakeFetcher {
    fn with(bodies: &[(&str, &str)]) -> Arc<Self> {
      Arc::new(Self {
        bodies: bodies
          .iter()
          .map(|(url, body)| (url.to_string(), body.as_bytes().to_vec()))
          .collect(),
        calls: AtomicUsize::new(0),
      })
    }
  }

  #[async_trait]
  impl BlobFetcher for FakeFetcher {
    async fn fetch(&self, remote_locator: &str) -> Result<Vec<u8>, SyncError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      self
        .bodies
        .get(remote_locator)
        .cloned()
        .ok_or_else(|| SyncError::network("HTTP 404"))
    }
  }

  fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
      .unwrap()
      .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
      .collect();
    names.sort();
    names
  }

  #[test]
  fn test_file_name_uses_safe_id_verbatim() {
    assert_eq!(FsBlobCache::file_name("53012345678"), "53012345678.jpg");
    assert_eq!(FsBlobCache::file_name("abc_DEF-1"), "abc_DEF-1.jpg");
  }

  #[test]
  fn test_file_name_hashes_unsafe_id() {
    let name = FsBlobCache::file_name("../../etc/passwd");
    assert_eq!(name.len(), 64 + 4);
    assert!(name.ends_with(".jpg"));
    assert!(!name.contains('/'));
    assert_eq!(name, FsBlobCache::file_name("../../etc/passwd"));
  }

  #[tokio::test]
  async fn test_materialize_downloads_once() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = FakeFetcher::with(&[("https://img/1.jpg", "jpeg bytes")]);
    let cache = FsBlobCache::new(dir.path(), fetcher.clone()).unwrap();

    let first = cache.materialize("https://img/1.jpg", "1").await.unwrap();
    let second = cache.materialize("https://img/1.jpg", "1").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    assert!(cache.exists(&first).await);
    assert_eq!(std::fs::read(&first).unwrap(), b"jpeg bytes");
  }

  #[tokio::test]
  async fn test_failed_materialize_leaves_no_trace() {
    let dir = tempfile::tempdir().unwrap();
    let cache = FsBlobCache::new(dir.path(), FakeFetcher::with(&[])).unwrap();

    let err = cache.materialize("https://img/missing.jpg", "9").await.unwrap_err();
    assert!(matches!(err, SyncError::Fetch { ref id, .. } if id == "9"));
    assert!(file_names(dir.path()).is_empty());
  }

  #[tokio::test]
  async fn test_empty_body_is_a_fetch_error() {
    let dir = tempfile::tempdir().unwrap();
    let cache = FsBlobCache::new(dir.path(), FakeFetcher::with(&[("https://img/e.jpg", "")])).unwrap();

    assert!(cache.materialize("https://img/e.jpg", "e").await.is_err());
    assert!(file_names(dir.path()).is_empty());
  }

  #[tokio::test]
  async fn test_exists_is_false_for_missing_or_directory() {
    let dir = tempfile::tempdir().unwrap();
    let cache = FsBlobCache::new(dir.path(), FakeFetcher::with(&[])).unwrap();

    let missing = dir.path().join("nope.jpg");
    assert!(!cache.exists(&missing.to_string_lossy()).await);
    assert!(!cache.exists(&dir.path().to_string_lossy()).await);
  }

  #[tokio::test]
  async fn test_list_and_remove_blobs() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = FakeFetcher::with(&[("u1", "1"), ("u2", "2")]);
    let cache = FsBlobCache::new(dir.path(), fetcher).unwrap();
    let one = cache.materialize("u1", "1").await.unwrap();
    let two = cache.materialize("u2", "2").await.unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

    assert_eq!(cache.list_blobs().await.unwrap(), vec![one.clone(), two.clone()]);

    cache.remove(&one).await.unwrap();
    cache.remove(&one).await.unwrap();
    assert_eq!(cache.list_blobs().await.unwrap(), vec![two]);
  }

  #[tokio::test]
  async fn test_remove_refuses_paths_outside_root() {
    let dir = tempfile::tempdir().unwrap();
    let outside = tempfile::NamedTempFile::new().unwrap();
    let cache = FsBlobCache::new(dir.path(), FakeFetcher::with(&[])).unwrap();

    let err = cache.remove(&outside.path().to_string_lossy()).await.unwrap_err();
    assert!(matches!(err, SyncError::Io { .. }));
    assert!(outside.path().exists());
  }

  #[tokio::test]
  async fn test_sweep_partials() {
    let dir = tempfile::tempdir().unwrap();
    let cache = FsBlobCache::new(dir.path(), FakeFetcher::with(&[])).unwrap();
    std::fs::write(dir.path().join("1.jpg.part"), b"half").unwrap();
    std::fs::write(dir.path().join("2.jpg"), b"whole").unwrap();

    assert_eq!(cache.sweep_partials().await.unwrap(), 1);
    assert_eq!(file_names(dir.path()), vec!["2.jpg".to_string()]);
  }
}
