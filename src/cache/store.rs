//! Cache entry store: partitioned response cache backed by SQLite.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::traits::{CachedResponse, RequestKey};

/// Persistent key/value store for response blobs, partitioned by cache
/// generation. Bound enforcement is the caller's job; `put` never evicts.
pub struct CacheEntryStore {
  conn: Mutex<Connection>,
}

/// Schema for the cache table.
///
/// `inserted_at` is a monotonic insertion counter, not wall-clock time; it is
/// only used to order eviction.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    partition TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    key_desc TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    inserted_at INTEGER NOT NULL,
    PRIMARY KEY (partition, key_hash)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_order
    ON cache_entries(partition, inserted_at);
"#;

impl CacheEntryStore {
  /// Open or create the store at the given path.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Open the store at the default location.
  pub fn open_default() -> Result<Self> {
    Self::open(&Self::default_path()?)
  }

  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("trainloop").join("cache.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  /// Insert or overwrite an entry. Overwriting keeps the original insertion
  /// position; nothing here tracks access time.
  pub fn put(&self, partition: &str, key: &RequestKey, payload: &CachedResponse) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let headers = serde_json::to_string(&payload.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    conn
      .execute(
        "INSERT INTO cache_entries (partition, key_hash, key_desc, status, headers, body, inserted_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6,
                 (SELECT COALESCE(MAX(inserted_at), 0) + 1 FROM cache_entries))
         ON CONFLICT(partition, key_hash) DO UPDATE SET
             key_desc = excluded.key_desc,
             status = excluded.status,
             headers = excluded.headers,
             body = excluded.body",
        params![
          partition,
          key.storage_key(),
          key.description(),
          payload.status,
          headers,
          payload.body
        ],
      )
      .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;

    Ok(())
  }

  /// Look up an entry. Absence is a normal outcome, never an error.
  pub fn get(&self, partition: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT status, headers, body FROM cache_entries
         WHERE partition = ?1 AND key_hash = ?2",
      )
      .map_err(|e| eyre!("Failed to prepare cache query: {}", e))?;

    let row: Option<(u16, String, Vec<u8>)> = stmt
      .query_row(params![partition, key.storage_key()], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
      })
      .ok();

    match row {
      Some((status, headers, body)) => {
        let headers: Vec<(String, String)> = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize cached headers: {}", e))?;
        Ok(Some(CachedResponse {
          status,
          headers,
          body,
        }))
      }
      None => Ok(None),
    }
  }

  /// Look up a key in any partition, stale generations included. Backs
  /// cache-first reads: entries from a previous generation keep serving hits
  /// until activation purges them.
  pub fn get_any(&self, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT status, headers, body FROM cache_entries
         WHERE key_hash = ?1
         ORDER BY partition
         LIMIT 1",
      )
      .map_err(|e| eyre!("Failed to prepare cache query: {}", e))?;

    let row: Option<(u16, String, Vec<u8>)> = stmt
      .query_row(params![key.storage_key()], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
      })
      .ok();

    match row {
      Some((status, headers, body)) => {
        let headers: Vec<(String, String)> = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize cached headers: {}", e))?;
        Ok(Some(CachedResponse {
          status,
          headers,
          body,
        }))
      }
      None => Ok(None),
    }
  }

  /// Remove oldest-inserted entries, one at a time, until the partition is
  /// within the limit. FIFO by insertion order, not LRU; access is never
  /// tracked, so the two are not interchangeable here.
  pub fn evict_oldest_if_over(&self, partition: &str, limit: usize) -> Result<()> {
    let count = self.partition_len(partition)?;
    if count <= limit {
      return Ok(());
    }

    {
      let conn = self
        .conn
        .lock()
        .map_err(|e| eyre!("Lock poisoned: {}", e))?;

      conn
        .execute(
          "DELETE FROM cache_entries
           WHERE partition = ?1 AND key_hash = (
               SELECT key_hash FROM cache_entries
               WHERE partition = ?1
               ORDER BY inserted_at ASC
               LIMIT 1
           )",
          params![partition],
        )
        .map_err(|e| eyre!("Failed to evict cache entry: {}", e))?;
    }

    self.evict_oldest_if_over(partition, limit)
  }

  /// Delete every partition whose name is not in `keep`. Called once when a
  /// new cache generation activates, to reclaim stale generations.
  pub fn purge_partitions_except(&self, keep: &[&str]) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let placeholders = keep.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
    let sql = format!(
      "DELETE FROM cache_entries WHERE partition NOT IN ({})",
      placeholders
    );

    conn
      .execute(&sql, rusqlite::params_from_iter(keep.iter()))
      .map_err(|e| eyre!("Failed to purge stale partitions: {}", e))?;

    Ok(())
  }

  /// Number of entries in a partition.
  pub fn partition_len(&self, partition: &str) -> Result<usize> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM cache_entries WHERE partition = ?1",
        params![partition],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count cache entries: {}", e))?;

    Ok(count as usize)
  }

  /// Request descriptions in a partition, oldest-inserted first.
  pub fn keys(&self, partition: &str) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT key_desc FROM cache_entries
         WHERE partition = ?1
         ORDER BY inserted_at ASC",
      )
      .map_err(|e| eyre!("Failed to prepare key listing: {}", e))?;

    let keys = stmt
      .query_map(params![partition], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list cache keys: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(keys)
  }

  /// Partition names currently present in the store.
  pub fn partitions(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT DISTINCT partition FROM cache_entries ORDER BY partition")
      .map_err(|e| eyre!("Failed to prepare partition listing: {}", e))?;

    let partitions = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list partitions: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(partitions)
  }
}
