//! Manifest store trait and SQLite key-value implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::error::SyncError;
use super::traits::{CacheRecord, Manifest, StoredManifest};

/// Fixed key the manifest is stored under.
pub const MANIFEST_KEY: &str = "cachedPhotos";

/// Durable home of the manifest.
///
/// `save` replaces the whole manifest; readers never observe a partial one.
pub trait ManifestStore: Send + Sync {
  /// Load the manifest. Fails with [`SyncError::NotFound`] if none was ever
  /// written and [`SyncError::CorruptManifest`] if it cannot be parsed.
  fn load(&self) -> Result<StoredManifest, SyncError>;

  /// Overwrite the manifest.
  fn save(&self, manifest: &Manifest) -> Result<(), SyncError>;
}

/// SQLite-backed key-value store.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the store at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create data directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a throwaway in-memory store.
  #[allow(dead_code)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Run database migrations for the key-value table.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(KV_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>, SyncError> {
    self
      .conn
      .lock()
      .map_err(|e| SyncError::io(format!("lock poisoned: {}", e)))
  }

  /// Read a raw value and the time it was written.
  pub fn get_value(&self, key: &str) -> Result<Option<(String, DateTime<Utc>)>, SyncError> {
    let conn = self.lock()?;

    let row: Option<(String, String)> = conn
      .query_row(
        "SELECT value, updated_at FROM kv_store WHERE key = ?",
        params![key],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| SyncError::io(format!("failed to read {}: {}", key, e)))?;

    match row {
      Some((value, updated_at)) => Ok(Some((value, parse_datetime(&updated_at)?))),
      None => Ok(None),
    }
  }

  /// Write a raw value, replacing any previous one in a single statement.
  pub fn set_value(&self, key: &str, value: &str) -> Result<(), SyncError> {
    let conn = self.lock()?;

    conn
      .execute(
        "INSERT OR REPLACE INTO kv_store (key, value, updated_at)
         VALUES (?, ?, datetime('now'))",
        params![key, value],
      )
      .map_err(|e| SyncError::io(format!("failed to write {}: {}", key, e)))?;

    Ok(())
  }
}

/// Schema for the key-value table.
const KV_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl ManifestStore for SqliteStorage {
  fn load(&self) -> Result<StoredManifest, SyncError> {
    let (value, saved_at) = self.get_value(MANIFEST_KEY)?.ok_or(SyncError::NotFound)?;

    let records: Vec<CacheRecord> = serde_json::from_str(&value).map_err(SyncError::corrupt)?;

    Ok(StoredManifest {
      manifest: Manifest::from_records(records),
      saved_at,
    })
  }

  fn save(&self, manifest: &Manifest) -> Result<(), SyncError> {
    let value = serde_json::to_string(manifest.records())
      .map_err(|e| SyncError::io(format!("failed to serialize manifest: {}", e)))?;
    self.set_value(MANIFEST_KEY, &value)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, SyncError> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| SyncError::corrupt(format!("bad timestamp '{}': {}", s, e)))
}
