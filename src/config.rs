use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub flickr: FlickrConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub connectivity: ConnectivityConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FlickrConfig {
  /// REST endpoint
  pub endpoint: String,
  /// API key; the environment is checked when unset
  pub api_key: Option<String>,
  /// Photos per page
  pub per_page: u32,
  /// Request timeout for API calls and image downloads
  pub timeout_secs: u64,
}

impl Default for FlickrConfig {
  fn default() -> Self {
    Self {
      endpoint: "https://api.flickr.com/services/rest/".to_string(),
      api_key: None,
      per_page: 20,
      timeout_secs: 15,
    }
  }
}

impl FlickrConfig {
  /// Get the Flickr API key.
  ///
  /// Uses the config value first, then PHOTOSYNC_FLICKR_API_KEY, then
  /// FLICKR_API_KEY.
  pub fn api_key(&self) -> Result<String> {
    if let Some(key) = self.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
      return Ok(key.to_string());
    }

    std::env::var("PHOTOSYNC_FLICKR_API_KEY")
      .or_else(|_| std::env::var("FLICKR_API_KEY"))
      .map_err(|_| {
        eyre!(
          "Flickr API key not found. Set flickr.api_key in the config file or the \
           PHOTOSYNC_FLICKR_API_KEY environment variable."
        )
      })
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Directory holding downloaded photos
  pub dir: Option<PathBuf>,
  /// SQLite database holding the manifest
  pub database: Option<PathBuf>,
}

impl CacheConfig {
  pub fn blob_dir(&self) -> Result<PathBuf> {
    match &self.dir {
      Some(dir) => Ok(dir.clone()),
      None => {
        let cache_dir = dirs::cache_dir()
          .or_else(|| dirs::home_dir().map(|p| p.join(".cache")))
          .ok_or_else(|| eyre!("Could not determine cache directory"))?;
        Ok(cache_dir.join("photosync").join("photos"))
      }
    }
  }

  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.database {
      Some(path) => Ok(path.clone()),
      None => Ok(data_dir()?.join("cache.db")),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
  /// host:port probed to decide whether the network is up
  pub probe: String,
  pub timeout_ms: u64,
}

impl Default for ConnectivityConfig {
  fn default() -> Self {
    Self {
      probe: "api.flickr.com:443".to_string(),
      timeout_ms: 1500,
    }
  }
}

impl ConnectivityConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_millis(self.timeout_ms)
  }
}

/// Per-user data directory ($XDG_DATA_HOME/photosync)
pub fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("photosync"))
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./photosync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/photosync/config.yaml
  ///
  /// Without any file the defaults apply.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("photosync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("photosync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;

    if config.flickr.per_page == 0 {
      return Err(eyre!("flickr.per_page must be at least 1"));
    }

    Ok(config)
  }
}
