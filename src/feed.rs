//! Read-only gallery projection for the UI layer.
//!
//! A `GalleryFeed` owns no cache state of its own. It issues page requests
//! to the [`CacheSynchronizer`] on a background task and keeps the latest
//! [`SyncResult`] plus a loading/error state for rendering.
//!
//! # Example
//!
//! ```ignore
//! let mut feed = GalleryFeed::new(synchronizer);
//! feed.initial_load(1);
//!
//! // In event loop tick
//! if feed.poll() {
//!     // State changed, trigger re-render
//! }
//!
//! // When scrolled to the bottom
//! feed.load_more();
//! ```

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

use crate::cache::{CacheRecord, CacheSynchronizer, SyncError, SyncMode, SyncResult};

/// What kind of user action issued a page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
  /// Opening the gallery
  Initial,
  /// Scrolled to the end of the list
  LoadMore,
  /// Retry after a failed or degraded request
  Retry,
}

/// One page request. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
  pub kind: RequestKind,
  pub page: u32,
}

/// The state of the feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedState {
  /// Nothing requested yet
  Idle,
  /// A request is in flight
  Loading(PageRequest),
  /// The last request produced a result
  Ready,
  /// The last request was rejected
  Failed(String),
}

type SyncOutcome = Result<SyncResult, SyncError>;

/// Gallery state as seen by the UI.
pub struct GalleryFeed {
  sync: Arc<CacheSynchronizer>,
  state: FeedState,
  /// Latest result, kept while the next page loads
  result: Option<SyncResult>,
  last_request: Option<PageRequest>,
  receiver: Option<mpsc::UnboundedReceiver<SyncOutcome>>,
}

impl GalleryFeed {
  pub fn new(sync: Arc<CacheSynchronizer>) -> Self {
    Self {
      sync,
      state: FeedState::Idle,
      result: None,
      last_request: None,
      receiver: None,
    }
  }

  pub fn state(&self) -> &FeedState {
    &self.state
  }

  pub fn result(&self) -> Option<&SyncResult> {
    self.result.as_ref()
  }

  /// Photos to display
  pub fn items(&self) -> &[CacheRecord] {
    self.result.as_ref().map(|r| r.items.as_slice()).unwrap_or_default()
  }

  pub fn is_loading(&self) -> bool {
    matches!(self.state, FeedState::Loading(_))
  }

  /// Dismissible notice to show above the gallery, if any.
  pub fn notice(&self) -> Option<String> {
    match &self.state {
      FeedState::Failed(error) => Some(format!("Loading photos failed: {}", error)),
      FeedState::Ready => self.result.as_ref().and_then(|r| r.notice()).map(String::from),
      _ => None,
    }
  }

  /// Open the gallery at `page`. Page 1 replaces whatever was shown.
  ///
  /// No-op unless idle.
  pub fn initial_load(&mut self, page: u32) -> bool {
    if self.state != FeedState::Idle {
      return false;
    }
    self.start(RequestKind::Initial, page)
  }

  /// Ask for the page after the last successful one.
  ///
  /// Only fresh results have a next page; after a degraded or failed
  /// request use [`retry`](Self::retry).
  pub fn load_more(&mut self) -> bool {
    if self.state != FeedState::Ready {
      return false;
    }
    match &self.result {
      Some(result) if result.mode == SyncMode::Fresh => {
        let page = result.next_page;
        self.start(RequestKind::LoadMore, page)
      }
      _ => false,
    }
  }

  /// Re-issue the last request.
  pub fn retry(&mut self) -> bool {
    let page = self.last_request.map(|r| r.page).unwrap_or(1);
    self.start(RequestKind::Retry, page)
  }

  /// Poll for the outcome of a pending request.
  ///
  /// Returns `true` if the state changed. Call this in your event loop tick
  /// handler.
  pub fn poll(&mut self) -> bool {
    let receiver = match &mut self.receiver {
      Some(rx) => rx,
      None => return false,
    };

    match receiver.try_recv() {
      Ok(outcome) => {
        self.apply(outcome);
        true
      }
      Err(mpsc::error::TryRecvError::Empty) => false,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        // Sender dropped without sending
        self.receiver = None;
        self.state = FeedState::Failed("sync task was cancelled".to_string());
        true
      }
    }
  }

  fn apply(&mut self, outcome: SyncOutcome) {
    self.receiver = None;
    match outcome {
      Ok(result) => {
        self.result = Some(result);
        self.state = FeedState::Ready;
      }
      Err(error) => {
        warn!(error = %error, retryable = error.is_retryable(), "page request rejected");
        self.state = FeedState::Failed(error.to_string());
      }
    }
  }

  /// Spawn the request. No-op while another one is pending.
  fn start(&mut self, kind: RequestKind, page: u32) -> bool {
    if self.is_loading() {
      return false;
    }

    let request = PageRequest { kind, page };
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    self.state = FeedState::Loading(request);
    self.last_request = Some(request);

    let sync = Arc::clone(&self.sync);
    tokio::spawn(async move {
      // Ignore send errors - the feed may have been dropped
      let _ = tx.send(sync.sync(page).await);
    });
    true
  }
}

impl std::fmt::Debug for GalleryFeed {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("GalleryFeed")
      .field("state", &self.state)
      .field("items", &self.items().len())
      .field("last_request", &self.last_request)
      .finish_non_exhaustive()
  }
}
