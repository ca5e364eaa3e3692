//! Cache storage trait with in-memory and SQLite implementations.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::types::{CachedEntry, RequestKey, ResponseSnapshot, ResponseType};
use crate::error::{CacheError, Result};

/// Trait for cache storage backends.
///
/// A backend holds named buckets of request-key to response-snapshot entries,
/// plus the persisted pointer to the active generation. Every single-key read
/// or write is atomic, and `put_all` is all-or-nothing.
pub trait CacheStorage: Send + Sync {
  /// Create the bucket if it does not exist yet.
  fn open_bucket(&self, name: &str) -> Result<()>;

  fn has_bucket(&self, name: &str) -> Result<bool>;

  /// All bucket names in creation order.
  fn bucket_names(&self) -> Result<Vec<String>>;

  /// Remove a bucket and its entries. Returns false if it did not exist.
  fn delete_bucket(&self, name: &str) -> Result<bool>;

  fn match_entry(&self, bucket: &str, key: &RequestKey) -> Result<Option<CachedEntry>>;

  /// Insert or replace a single entry, creating the bucket if needed.
  fn put(&self, bucket: &str, key: &RequestKey, response: &ResponseSnapshot) -> Result<()>;

  /// Insert every entry or none of them.
  fn put_all(&self, bucket: &str, entries: &[(RequestKey, ResponseSnapshot)]) -> Result<()>;

  /// Keys stored in a bucket, in insertion order.
  fn entry_keys(&self, bucket: &str) -> Result<Vec<RequestKey>>;

  fn active_generation(&self) -> Result<Option<String>>;

  fn set_active_generation(&self, generation: Option<&str>) -> Result<()>;
}

#[derive(Default)]
struct MemoryState {
  buckets: Vec<(String, Vec<CachedEntry>)>,
  active: Option<String>,
}

impl MemoryState {
  fn bucket_mut(&mut self, name: &str) -> &mut Vec<CachedEntry> {
    let idx = match self.buckets.iter().position(|(n, _)| n == name) {
      Some(idx) => idx,
      None => {
        self.buckets.push((name.to_string(), Vec::new()));
        self.buckets.len() - 1
      }
    };
    &mut self.buckets[idx].1
  }

  fn bucket(&self, name: &str) -> Option<&Vec<CachedEntry>> {
    self
      .buckets
      .iter()
      .find(|(n, _)| n == name)
      .map(|(_, entries)| entries)
  }

  fn upsert(&mut self, bucket: &str, key: &RequestKey, response: &ResponseSnapshot) {
    let entries = self.bucket_mut(bucket);
    entries.retain(|e| &e.key != key);
    entries.push(CachedEntry {
      key: key.clone(),
      response: response.clone(),
      cached_at: Utc::now(),
    });
  }
}

/// Process-local storage. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStorage {
  state: Mutex<MemoryState>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn state(&self) -> Result<MutexGuard<'_, MemoryState>> {
    self
      .state
      .lock()
      .map_err(|e| CacheError::storage("Lock poisoned", e))
  }
}

impl CacheStorage for MemoryStorage {
  fn open_bucket(&self, name: &str) -> Result<()> {
    self.state()?.bucket_mut(name);
    Ok(())
  }

  fn has_bucket(&self, name: &str) -> Result<bool> {
    Ok(self.state()?.bucket(name).is_some())
  }

  fn bucket_names(&self) -> Result<Vec<String>> {
    Ok(self.state()?.buckets.iter().map(|(n, _)| n.clone()).collect())
  }

  fn delete_bucket(&self, name: &str) -> Result<bool> {
    let mut state = self.state()?;
    let before = state.buckets.len();
    state.buckets.retain(|(n, _)| n != name);
    Ok(state.buckets.len() != before)
  }

  fn match_entry(&self, bucket: &str, key: &RequestKey) -> Result<Option<CachedEntry>> {
    Ok(
      self
        .state()?
        .bucket(bucket)
        .and_then(|entries| entries.iter().find(|e| &e.key == key))
        .cloned(),
    )
  }

  fn put(&self, bucket: &str, key: &RequestKey, response: &ResponseSnapshot) -> Result<()> {
    self.state()?.upsert(bucket, key, response);
    Ok(())
  }

  fn put_all(&self, bucket: &str, entries: &[(RequestKey, ResponseSnapshot)]) -> Result<()> {
    // Single lock for the whole batch
    let mut state = self.state()?;
    state.bucket_mut(bucket);
    for (key, response) in entries {
      state.upsert(bucket, key, response);
    }
    Ok(())
  }

  fn entry_keys(&self, bucket: &str) -> Result<Vec<RequestKey>> {
    Ok(
      self
        .state()?
        .bucket(bucket)
        .map(|entries| entries.iter().map(|e| e.key.clone()).collect())
        .unwrap_or_default(),
    )
  }

  fn active_generation(&self) -> Result<Option<String>> {
    Ok(self.state()?.active.clone())
  }

  fn set_active_generation(&self, generation: Option<&str>) -> Result<()> {
    self.state()?.active = generation.map(String::from);
    Ok(())
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the database at the default location.
  pub fn open_default() -> Result<Self> {
    Self::open(&Self::default_path()?)
  }

  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| CacheError::storage("Failed to create cache directory", e))?;
    }

    let conn = Connection::open(path).map_err(|e| {
      CacheError::storage(
        &format!("Failed to open cache database at {}", path.display()),
        e,
      )
    })?;

    Self::with_connection(conn)
  }

  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| CacheError::storage("Failed to open in-memory database", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| CacheError::Storage("Could not determine data directory".into()))?;

    Ok(data_dir.join("offcache").join("cache.db"))
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| CacheError::storage("Lock poisoned", e))
  }

  fn run_migrations(&self) -> Result<()> {
    self
      .conn()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| CacheError::storage("Failed to run cache migrations", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One row per generation bucket; rowid gives creation order
CREATE TABLE IF NOT EXISTS cache_buckets (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Stored response snapshots
CREATE TABLE IF NOT EXISTS cache_entries (
    bucket TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    request_key TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    response_type TEXT NOT NULL,
    redirected INTEGER NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (bucket, key_hash)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_bucket ON cache_entries(bucket);

-- Single-row registration state
CREATE TABLE IF NOT EXISTS registration (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    active_generation TEXT
);
"#;

fn insert_entry(
  conn: &Connection,
  bucket: &str,
  key: &RequestKey,
  response: &ResponseSnapshot,
) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)?;
  conn
    .execute(
      "INSERT OR IGNORE INTO cache_buckets (name) VALUES (?)",
      params![bucket],
    )
    .map_err(|e| CacheError::storage("Failed to create bucket", e))?;
  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries
         (bucket, key_hash, request_key, url, status, headers, body, response_type, redirected, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        bucket,
        key.digest(),
        key.as_str(),
        response.url,
        response.status,
        headers,
        response.body,
        response.response_type.as_str(),
        response.redirected,
      ],
    )
    .map_err(|e| CacheError::storage("Failed to store entry", e))?;
  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn open_bucket(&self, name: &str) -> Result<()> {
    self
      .conn()?
      .execute(
        "INSERT OR IGNORE INTO cache_buckets (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| CacheError::storage("Failed to create bucket", e))?;
    Ok(())
  }

  fn has_bucket(&self, name: &str) -> Result<bool> {
    let found: Option<i64> = self
      .conn()?
      .query_row(
        "SELECT 1 FROM cache_buckets WHERE name = ?",
        params![name],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| CacheError::storage("Failed to look up bucket", e))?;
    Ok(found.is_some())
  }

  fn bucket_names(&self) -> Result<Vec<String>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare("SELECT name FROM cache_buckets ORDER BY rowid")
      .map_err(|e| CacheError::storage("Failed to prepare query", e))?;
    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| CacheError::storage("Failed to list buckets", e))?
      .collect::<std::result::Result<Vec<String>, _>>()
      .map_err(|e| CacheError::storage("Failed to read bucket name", e))?;
    Ok(names)
  }

  fn delete_bucket(&self, name: &str) -> Result<bool> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| CacheError::storage("Failed to begin transaction", e))?;
    tx.execute("DELETE FROM cache_entries WHERE bucket = ?", params![name])
      .map_err(|e| CacheError::storage("Failed to delete entries", e))?;
    let removed = tx
      .execute("DELETE FROM cache_buckets WHERE name = ?", params![name])
      .map_err(|e| CacheError::storage("Failed to delete bucket", e))?;
    tx.commit()
      .map_err(|e| CacheError::storage("Failed to commit transaction", e))?;
    Ok(removed > 0)
  }

  fn match_entry(&self, bucket: &str, key: &RequestKey) -> Result<Option<CachedEntry>> {
    let conn = self.conn()?;
    let row = conn
      .query_row(
        "SELECT url, status, headers, body, response_type, redirected, cached_at
         FROM cache_entries WHERE bucket = ? AND key_hash = ?",
        params![bucket, key.digest()],
        |row| {
          Ok((
            row.get::<_, String>(0)?,
            row.get::<_, u16>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, Vec<u8>>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, bool>(5)?,
            row.get::<_, String>(6)?,
          ))
        },
      )
      .optional()
      .map_err(|e| CacheError::storage("Failed to look up entry", e))?;

    let Some((url, status, headers, body, response_type, redirected, cached_at)) = row else {
      return Ok(None);
    };

    let response_type = ResponseType::parse(&response_type)
      .ok_or_else(|| CacheError::Storage(format!("Unknown response type '{}'", response_type)))?;

    Ok(Some(CachedEntry {
      key: key.clone(),
      response: ResponseSnapshot {
        url,
        status,
        headers: serde_json::from_str(&headers)?,
        body,
        response_type,
        redirected,
      },
      cached_at: parse_datetime(&cached_at)?,
    }))
  }

  fn put(&self, bucket: &str, key: &RequestKey, response: &ResponseSnapshot) -> Result<()> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| CacheError::storage("Failed to begin transaction", e))?;
    insert_entry(&tx, bucket, key, response)?;
    tx.commit()
      .map_err(|e| CacheError::storage("Failed to commit transaction", e))
  }

  fn put_all(&self, bucket: &str, entries: &[(RequestKey, ResponseSnapshot)]) -> Result<()> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| CacheError::storage("Failed to begin transaction", e))?;
    tx.execute(
      "INSERT OR IGNORE INTO cache_buckets (name) VALUES (?)",
      params![bucket],
    )
    .map_err(|e| CacheError::storage("Failed to create bucket", e))?;
    for (key, response) in entries {
      // Dropping the transaction on error rolls the whole batch back
      insert_entry(&tx, bucket, key, response)?;
    }
    tx.commit()
      .map_err(|e| CacheError::storage("Failed to commit transaction", e))
  }

  fn entry_keys(&self, bucket: &str) -> Result<Vec<RequestKey>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare("SELECT request_key FROM cache_entries WHERE bucket = ? ORDER BY rowid")
      .map_err(|e| CacheError::storage("Failed to prepare query", e))?;
    let keys = stmt
      .query_map(params![bucket], |row| row.get::<_, String>(0))
      .map_err(|e| CacheError::storage("Failed to list entries", e))?
      .map(|r| r.map(RequestKey::from))
      .collect::<std::result::Result<Vec<_>, _>>()
      .map_err(|e| CacheError::storage("Failed to read entry key", e))?;
    Ok(keys)
  }

  fn active_generation(&self) -> Result<Option<String>> {
    let active: Option<Option<String>> = self
      .conn()?
      .query_row(
        "SELECT active_generation FROM registration WHERE id = 1",
        [],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| CacheError::storage("Failed to read registration", e))?;
    Ok(active.flatten())
  }

  fn set_active_generation(&self, generation: Option<&str>) -> Result<()> {
    self
      .conn()?
      .execute(
        "INSERT OR REPLACE INTO registration (id, active_generation) VALUES (1, ?)",
        params![generation],
      )
      .map_err(|e| CacheError::storage("Failed to update registration", e))?;
    Ok(())
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| CacheError::Storage(format!("Failed to parse datetime '{}': {}", s, e)))
}
