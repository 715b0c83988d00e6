//! Serde-deserializable types matching Flickr REST API responses.
//!
//! These types are separate from the cache types to allow clean
//! deserialization while keeping the cache focused on what it stores.

use serde::Deserialize;

use crate::cache::{RemoteItem, SyncError};

// ============================================================================
// flickr.photos.getRecent response
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiPhoto {
  pub id: String,
  /// Small (240px) image URL, only present when requested via `extras`
  pub url_s: Option<String>,
  #[serde(default)]
  pub title: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiPhotoPage {
  #[serde(default)]
  pub photo: Vec<ApiPhoto>,
}

/// Top-level envelope. On failure Flickr sends `stat: "fail"` with a code
/// and message instead of `photos`.
#[derive(Debug, Deserialize)]
pub struct ApiRecentResponse {
  pub photos: Option<ApiPhotoPage>,
  #[serde(default)]
  pub stat: String,
  pub code: Option<i64>,
  pub message: Option<String>,
}

// ============================================================================
// Conversions to cache types
// ============================================================================

impl ApiPhoto {
  /// Photos without a displayable image are dropped, not treated as errors.
  pub fn into_remote_item(self) -> Option<RemoteItem> {
    let locator = self.url_s.filter(|url| !url.trim().is_empty())?;
    let title = Some(self.title).filter(|t| !t.is_empty());
    Some(RemoteItem {
      id: self.id,
      remote_locator: locator,
      title,
    })
  }
}

/// Parse a getRecent response body into the items worth caching.
pub fn parse_recent(body: &[u8]) -> Result<Vec<RemoteItem>, SyncError> {
  let response: ApiRecentResponse = serde_json::from_slice(body)
    .map_err(|e| SyncError::network(format!("unexpected response from Flickr: {}", e)))?;

  if response.stat == "fail" {
    return Err(SyncError::network(format!(
      "Flickr error {}: {}",
      response.code.unwrap_or_default(),
      response.message.as_deref().unwrap_or("unknown error")
    )));
  }

  let page = response
    .photos
    .ok_or_else(|| SyncError::network("Flickr response has no photos"))?;

  Ok(
    page
      .photo
      .into_iter()
      .filter_map(ApiPhoto::into_remote_item)
      .collect(),
  )
}
