//! SQLite-backed durable store.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};

use super::{DurableStore, StoreKey};
use crate::db::Database;

/// Durable store persisted in the `kv_store` table.
#[derive(Clone)]
pub struct SqliteStore {
  db: Database,
}

impl SqliteStore {
  pub fn new(db: Database) -> Self {
    Self { db }
  }
}

impl DurableStore for SqliteStore {
  fn get(&self, key: StoreKey) -> Result<Option<String>> {
    let conn = self.db.conn()?;

    conn
      .query_row(
        "SELECT value FROM kv_store WHERE key = ?",
        params![key.as_str()],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read {}: {}", key.as_str(), e))
  }

  fn put(&self, key: StoreKey, value: &str) -> Result<()> {
    let conn = self.db.conn()?;

    conn
      .execute(
        "INSERT OR REPLACE INTO kv_store (key, value, written_at)
         VALUES (?, ?, datetime('now'))",
        params![key.as_str(), value],
      )
      .map_err(|e| eyre!("Failed to write {}: {}", key.as_str(), e))?;

    Ok(())
  }
}
