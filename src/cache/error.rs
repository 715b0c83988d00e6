//! Error taxonomy for the photo cache.

use std::fmt::Display;

/// Errors raised by the cache collaborators and the synchronizer.
///
/// Only [`SyncError::Busy`] and [`SyncError::InvalidPage`] ever reach the
/// caller of [`CacheSynchronizer::sync`](super::CacheSynchronizer::sync);
/// everything else is recovered inside the synchronizer.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
  /// Remote source unreachable or answered with a non-success response.
  #[error("network error: {message}")]
  Network { message: String },

  /// A single photo could not be downloaded into the blob cache.
  #[error("failed to fetch photo {id}: {message}")]
  Fetch { id: String, message: String },

  /// Local storage failure (manifest database or blob directory).
  #[error("I/O error: {message}")]
  Io { message: String },

  /// The persisted manifest could not be parsed.
  #[error("corrupt manifest: {message}")]
  CorruptManifest { message: String },

  /// No manifest has ever been written.
  #[error("no manifest has been written yet")]
  NotFound,

  /// Another sync is already in flight.
  #[error("a sync is already in progress")]
  Busy,

  /// Page numbers start at 1.
  #[error("invalid page number {page}: pages start at 1")]
  InvalidPage { page: u32 },
}

impl SyncError {
  pub fn network(message: impl Display) -> Self {
    Self::Network {
      message: message.to_string(),
    }
  }

  pub fn fetch(id: impl Into<String>, message: impl Display) -> Self {
    Self::Fetch {
      id: id.into(),
      message: message.to_string(),
    }
  }

  pub fn io(message: impl Display) -> Self {
    Self::Io {
      message: message.to_string(),
    }
  }

  pub fn corrupt(message: impl Display) -> Self {
    Self::CorruptManifest {
      message: message.to_string(),
    }
  }

  /// Returns `true` if issuing the same request again might succeed.
  pub fn is_retryable(&self) -> bool {
    matches!(
      self,
      Self::Network { .. } | Self::Fetch { .. } | Self::Io { .. } | Self::Busy
    )
  }

  /// Missing and corrupt manifests both mean "no usable offline data".
  pub fn is_no_offline_data(&self) -> bool {
    matches!(self, Self::NotFound | Self::CorruptManifest { .. })
  }
}

impl From<std::io::Error> for SyncError {
  fn from(err: std::io::Error) -> Self {
    Self::io(err)
  }
}
