use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::cache::{
  CacheRecord, CacheSynchronizer, Connectivity, DegradedReason, FsBlobCache, HttpFetcher,
  SqliteStorage, SyncResult,
};
use crate::config::Config;
use crate::connectivity::{ProbeConnectivity, StaticConnectivity};
use crate::feed::{FeedState, GalleryFeed};
use crate::flickr::FlickrClient;

/// How often the pending page request is polled
const TICK: Duration = Duration::from_millis(50);

/// Command-line front end: wires the concrete collaborators into one
/// synchronizer and prints what it produces.
pub struct App {
  sync: Arc<CacheSynchronizer>,
  blob_dir: PathBuf,
  /// Why syncing from Flickr cannot work, if it cannot
  remote_unavailable: Option<String>,
}

impl App {
  pub fn new(config: Config, offline: bool) -> Result<Self> {
    let manifests = SqliteStorage::open(&config.cache.database_path()?)?;

    let fetcher = HttpFetcher::new(config.flickr.timeout())?;
    let blobs = FsBlobCache::new(config.cache.blob_dir()?, Arc::new(fetcher))?;
    let blob_dir = blobs.root().to_path_buf();

    let remote = FlickrClient::new(&config.flickr)?;
    let remote_unavailable = match config.flickr.api_key() {
      Err(e) if !offline => Some(e.to_string()),
      _ => None,
    };

    let connectivity: Arc<dyn Connectivity> = if offline {
      Arc::new(StaticConnectivity(false))
    } else {
      Arc::new(ProbeConnectivity::new(
        config.connectivity.probe.clone(),
        config.connectivity.timeout(),
      ))
    };

    let sync = CacheSynchronizer::new(
      Arc::new(manifests),
      Arc::new(blobs),
      Arc::new(remote),
      connectivity,
      config.flickr.per_page,
    );

    Ok(Self {
      sync: Arc::new(sync),
      blob_dir,
      remote_unavailable,
    })
  }

  /// Open the gallery at `page` and load `pages` pages in total.
  ///
  /// Loading stops early once a result is degraded, since there is no next
  /// page to ask for. A page the remote failed to serve is retried once.
  pub async fn sync(&self, page: u32, pages: u32) -> Result<()> {
    if let Some(reason) = &self.remote_unavailable {
      return Err(eyre!("{} Use --offline to show cached photos.", reason));
    }

    let mut feed = GalleryFeed::new(Arc::clone(&self.sync));
    let mut retried = false;
    let mut loaded = 0;

    feed.initial_load(page);
    loop {
      wait(&mut feed).await;

      if feed.state() != &FeedState::Ready {
        break;
      }
      let reason = feed.result().and_then(|r| r.reason);
      if reason == Some(DegradedReason::RemoteFailed) && !retried {
        retried = true;
        info!("photo service failed, retrying once");
        feed.retry();
        continue;
      }

      loaded += 1;
      if loaded >= pages || !feed.load_more() {
        break;
      }
    }

    if let FeedState::Failed(error) = feed.state() {
      return Err(eyre!("Sync failed: {}", error));
    }

    if let Some(result) = feed.result() {
      info!(
        mode = %result.mode,
        items = result.items.len(),
        page_size = self.sync.page_size(),
        "gallery loaded"
      );
      self.print_result(result);
    }
    if let Some(notice) = feed.notice() {
      println!();
      println!("{}", notice);
    }
    Ok(())
  }

  /// Show the cached gallery without touching the network.
  pub async fn list(&self) -> Result<()> {
    let validated = self.sync.load_offline().await;

    match validated.saved_at {
      Some(saved_at) => println!(
        "Cached photos ({} items, saved {})",
        validated.records.len(),
        saved_at.format("%Y-%m-%d %H:%M:%S UTC")
      ),
      None => println!("Cached photos (0 items)"),
    }
    self.print_records(&validated.records);

    if validated.dropped > 0 {
      println!(
        "{} cached photo(s) are missing from {}. Run `photosync prune` to clean up.",
        validated.dropped,
        self.blob_dir.display()
      );
    }
    if validated.records.is_empty() {
      println!("No cached photos available.");
    }
    Ok(())
  }

  /// Drop dangling records and orphaned files.
  pub async fn prune(&self) -> Result<()> {
    let report = self
      .sync
      .prune()
      .await
      .map_err(|e| eyre!("Failed to prune photo cache: {}", e))?;

    println!("Pruned {}", self.blob_dir.display());
    println!("  records dropped:  {}", report.records_dropped);
    println!("  photos removed:   {}", report.blobs_removed);
    println!("  partial files:    {}", report.partials_removed);
    Ok(())
  }

  fn print_result(&self, result: &SyncResult) {
    println!(
      "Recent photos ({}, {} items, next page {})",
      result.mode,
      result.items.len(),
      result.next_page
    );
    if let Some(saved_at) = result.saved_at {
      println!("Cached at {}", saved_at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    self.print_records(&result.items);
    if result.items.is_empty() && !result.degraded {
      println!("No photos.");
    }
  }

  fn print_records(&self, records: &[CacheRecord]) {
    let width = records.iter().map(|r| r.id.len()).max().unwrap_or(0);
    for record in records {
      println!("  {:<width$}  {}", record.id, record.local_ref, width = width);
    }
  }
}

/// Tick until the pending request lands.
async fn wait(feed: &mut GalleryFeed) {
  let mut ticker = tokio::time::interval(TICK);
  while feed.is_loading() {
    ticker.tick().await;
    if feed.poll() {
      debug!(state = ?feed.state(), "feed updated");
    }
  }
}
