//! Local session state stores: primary and backup persistence tiers.
//!
//! Both tiers share one contract and one key derivation scheme; they differ
//! only in where they persist. The tiers are never written atomically with
//! each other, so readers must tolerate one being fresher than the other.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use super::progress::SessionProgress;

/// Key prefix for the primary tier.
pub const PRIMARY_KEY_PREFIX: &str = "workout_state_";

/// Key prefix for the backup tier.
pub const BACKUP_KEY_PREFIX: &str = "workout_state_backup_";

/// Contract shared by both local tiers.
///
/// `write` stamps `last_updated` with the current time before persisting.
/// A cleared or unavailable tier reads as absent, never as an error.
pub trait ProgressStore: Send + Sync {
  fn write(&self, session_id: &str, progress: &SessionProgress) -> Result<()>;

  fn read(&self, session_id: &str) -> Result<Option<SessionProgress>>;

  fn clear(&self, session_id: &str) -> Result<()>;

  /// Most recently written entry, if any. Backs local-only degradation when
  /// the ledger cannot be reached.
  fn latest(&self) -> Result<Option<(String, SessionProgress)>>;

  /// Session ids with persisted state, most recently written first.
  fn session_ids(&self) -> Result<Vec<String>>;
}

/// SQLite-backed tier. The primary and backup tiers use separate database
/// files so that clearing one leaves the other intact.
pub struct SqliteProgressStore {
  conn: Mutex<Connection>,
  key_prefix: String,
}

const STATE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS session_state (
    state_key TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    written_at TEXT NOT NULL
);
"#;

impl SqliteProgressStore {
  /// Open a tier at the given path with the given key prefix.
  pub fn open(path: &Path, key_prefix: &str) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create state directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open state database at {}: {}", path.display(), e))?;

    let store = Self {
      conn: Mutex::new(conn),
      key_prefix: key_prefix.to_string(),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Primary tier: durable app data, but clearable by the user.
  pub fn open_primary() -> Result<Self> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Self::open(
      &data_dir.join("trainloop").join("state.db"),
      PRIMARY_KEY_PREFIX,
    )
  }

  /// Backup tier: lives in the cache directory, a separate failure domain
  /// from the primary tier.
  pub fn open_backup() -> Result<Self> {
    let cache_dir =
      dirs::cache_dir().ok_or_else(|| eyre!("Could not determine cache directory"))?;

    Self::open(
      &cache_dir.join("trainloop").join("state_backup.db"),
      BACKUP_KEY_PREFIX,
    )
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(STATE_SCHEMA)
      .map_err(|e| eyre!("Failed to run state migrations: {}", e))?;

    Ok(())
  }

  /// Storage key derived deterministically from the session id. The
  /// derivation, not the storage technology, is the contract: it is what
  /// lets the reconciler probe each tier independently.
  fn state_key(&self, session_id: &str) -> String {
    format!("{}{}", self.key_prefix, session_id)
  }
}

impl ProgressStore for SqliteProgressStore {
  fn write(&self, session_id: &str, progress: &SessionProgress) -> Result<()> {
    let mut progress = progress.clone();
    progress.last_updated = Utc::now();

    let data = serde_json::to_vec(&progress)
      .map_err(|e| eyre!("Failed to serialize session progress: {}", e))?;

    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO session_state (state_key, data, written_at)
         VALUES (?1, ?2, ?3)",
        params![
          self.state_key(session_id),
          data,
          progress.last_updated.to_rfc3339()
        ],
      )
      .map_err(|e| eyre!("Failed to store session state: {}", e))?;

    Ok(())
  }

  fn read(&self, session_id: &str) -> Result<Option<SessionProgress>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let data: Option<Vec<u8>> = conn
      .query_row(
        "SELECT data FROM session_state WHERE state_key = ?1",
        params![self.state_key(session_id)],
        |row| row.get(0),
      )
      .ok();

    match data {
      Some(data) => match serde_json::from_slice(&data) {
        Ok(progress) => Ok(Some(progress)),
        Err(e) => {
          // Unreadable state is indistinguishable from a cleared tier
          tracing::debug!("discarding unreadable session state for {}: {e}", session_id);
          Ok(None)
        }
      },
      None => Ok(None),
    }
  }

  fn clear(&self, session_id: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM session_state WHERE state_key = ?1",
        params![self.state_key(session_id)],
      )
      .map_err(|e| eyre!("Failed to clear session state: {}", e))?;

    Ok(())
  }

  fn latest(&self) -> Result<Option<(String, SessionProgress)>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<(String, Vec<u8>)> = conn
      .query_row(
        "SELECT state_key, data FROM session_state
         ORDER BY written_at DESC
         LIMIT 1",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .ok();

    match row {
      Some((state_key, data)) => {
        let session_id = state_key
          .strip_prefix(&self.key_prefix)
          .unwrap_or(&state_key)
          .to_string();
        match serde_json::from_slice(&data) {
          Ok(progress) => Ok(Some((session_id, progress))),
          Err(_) => Ok(None),
        }
      }
      None => Ok(None),
    }
  }

  fn session_ids(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT state_key FROM session_state ORDER BY written_at DESC")
      .map_err(|e| eyre!("Failed to prepare state listing: {}", e))?;

    let ids = stmt
      .query_map([], |row| row.get::<_, String>(0))
      .map_err(|e| eyre!("Failed to list session state: {}", e))?
      .filter_map(|r| r.ok())
      .map(|key| {
        key
          .strip_prefix(&self.key_prefix)
          .unwrap_or(&key)
          .to_string()
      })
      .collect();

    Ok(ids)
  }
}

/// Process-scoped tier: survives within one run of the app but not across
/// restarts, the closest analog of the original backup tier. Also doubles as
/// the test stand-in for either tier.
#[derive(Default)]
pub struct MemoryProgressStore {
  entries: Mutex<HashMap<String, SessionProgress>>,
  order: Mutex<Vec<String>>,
}

impl MemoryProgressStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl ProgressStore for MemoryProgressStore {
  fn write(&self, session_id: &str, progress: &SessionProgress) -> Result<()> {
    let mut progress = progress.clone();
    progress.last_updated = Utc::now();

    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let mut order = self
      .order
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    entries.insert(session_id.to_string(), progress);
    order.retain(|id| id != session_id);
    order.push(session_id.to_string());

    Ok(())
  }

  fn read(&self, session_id: &str) -> Result<Option<SessionProgress>> {
    let entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    Ok(entries.get(session_id).cloned())
  }

  fn clear(&self, session_id: &str) -> Result<()> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let mut order = self
      .order
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    entries.remove(session_id);
    order.retain(|id| id != session_id);

    Ok(())
  }

  fn latest(&self) -> Result<Option<(String, SessionProgress)>> {
    let entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let order = self
      .order
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    Ok(
      order
        .last()
        .and_then(|id| entries.get(id).map(|p| (id.clone(), p.clone()))),
    )
  }

  fn session_ids(&self) -> Result<Vec<String>> {
    let order = self
      .order
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    Ok(order.iter().rev().cloned().collect())
  }
}
