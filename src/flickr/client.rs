use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use tracing::debug;
use url::Url;

use crate::cache::{RemoteItem, RemoteSource, SyncError};
use crate::config::FlickrConfig;

use super::api_types::parse_recent;

const RECENT_METHOD: &str = "flickr.photos.getRecent";

/// Flickr REST API client for the recent photos feed
#[derive(Clone)]
pub struct FlickrClient {
  http: reqwest::Client,
  endpoint: Url,
  /// Missing key only fails once a page is requested
  api_key: Option<String>,
}

impl FlickrClient {
  pub fn new(config: &FlickrConfig) -> Result<Self> {
    let api_key = config.api_key().ok();

    let endpoint = Url::parse(&config.endpoint)
      .map_err(|e| eyre!("Invalid Flickr endpoint {}: {}", config.endpoint, e))?;

    let http = reqwest::Client::builder()
      .timeout(config.timeout())
      .user_agent(concat!("photosync/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      endpoint,
      api_key,
    })
  }

  /// URL for one page of recent photos
  pub fn page_url(&self, api_key: &str, page: u32, per_page: u32) -> Url {
    let mut url = self.endpoint.clone();
    url
      .query_pairs_mut()
      .append_pair("method", RECENT_METHOD)
      .append_pair("api_key", api_key)
      .append_pair("per_page", &per_page.to_string())
      .append_pair("page", &page.to_string())
      .append_pair("format", "json")
      .append_pair("nojsoncallback", "1")
      .append_pair("extras", "url_s");
    url
  }
}

#[async_trait]
impl RemoteSource for FlickrClient {
  async fn fetch_page(&self, page: u32, page_size: u32) -> Result<Vec<RemoteItem>, SyncError> {
    let api_key = self
      .api_key
      .as_deref()
      .ok_or_else(|| SyncError::network("Flickr API key is not configured"))?;
    let url = self.page_url(api_key, page, page_size);

    let response = self
      .http
      .get(url)
      .send()
      .await
      .map_err(|e| SyncError::network(format!("failed to fetch recent photos: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
      return Err(SyncError::network(format!("Flickr answered {}", status)));
    }

    let body = response
      .bytes()
      .await
      .map_err(|e| SyncError::network(format!("failed to read response: {}", e)))?;

    let items = parse_recent(&body)?;
    debug!(page, items = items.len(), "fetched recent photos");
    Ok(items)
  }
}
