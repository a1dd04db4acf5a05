//! Response cache storage: named caches of successful responses.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};

use crate::db::Database;
use crate::net::NetworkResponse;

/// A stored response. Only ever built from a 2xx response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
  /// `METHOD url` identity of the request that produced it
  pub request_key: String,
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub cached_at: DateTime<Utc>,
}

impl CachedResponse {
  /// Snapshot `response` for storage. Returns `None` for non-2xx responses.
  pub fn from_response(request_key: impl Into<String>, response: &NetworkResponse) -> Option<Self> {
    if !response.is_ok() {
      return None;
    }

    Some(Self {
      request_key: request_key.into(),
      status: response.status,
      headers: response.headers.clone(),
      body: response.body.clone(),
      cached_at: Utc::now(),
    })
  }

  pub fn to_response(&self) -> NetworkResponse {
    NetworkResponse {
      status: self.status,
      headers: self.headers.clone(),
      body: self.body.clone(),
    }
  }
}

/// Trait for response cache backends.
pub trait ResponseCache: Send + Sync {
  /// Names of every cache holding at least one entry.
  fn cache_names(&self) -> Result<Vec<String>>;

  /// Drop a whole named cache. Returns whether anything was removed.
  fn delete_cache(&self, name: &str) -> Result<bool>;

  /// Look up an entry in one named cache.
  fn get(&self, name: &str, request_key: &str) -> Result<Option<CachedResponse>>;

  /// Look up an entry in any cache, trying `preferred` first.
  fn get_any(&self, request_key: &str, preferred: &str) -> Result<Option<CachedResponse>>;

  /// Store an entry, replacing any previous one for the same request.
  fn put(&self, name: &str, entry: &CachedResponse) -> Result<()>;

  /// Store several entries atomically: either all land or none do.
  fn put_all(&self, name: &str, entries: &[CachedResponse]) -> Result<()>;
}

/// Hash a request key for stable, fixed-length primary keys.
fn request_hash(request_key: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(request_key.as_bytes());
  hex::encode(hasher.finalize())
}

/// SQLite-backed response cache in the `response_cache` table.
#[derive(Clone)]
pub struct SqliteResponseCache {
  db: Database,
}

impl SqliteResponseCache {
  pub fn new(db: Database) -> Self {
    Self { db }
  }
}

fn insert_entry(conn: &rusqlite::Connection, name: &str, entry: &CachedResponse) -> Result<()> {
  let headers = serde_json::to_string(&entry.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO response_cache
         (cache_name, request_hash, request_key, status, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?)",
      params![
        name,
        request_hash(&entry.request_key),
        entry.request_key,
        entry.status,
        headers,
        entry.body,
        entry.cached_at.format(DATETIME_FORMAT).to_string(),
      ],
    )
    .map_err(|e| eyre!("Failed to store response for {}: {}", entry.request_key, e))?;

  Ok(())
}

type EntryRow = (String, u16, String, Vec<u8>, String);

fn decode_entry(row: EntryRow) -> Result<CachedResponse> {
  let (request_key, status, headers, body, cached_at) = row;
  let headers = serde_json::from_str(&headers)
    .map_err(|e| eyre!("Failed to parse cached headers for {}: {}", request_key, e))?;

  Ok(CachedResponse {
    request_key,
    status,
    headers,
    body,
    cached_at: parse_datetime(&cached_at)?,
  })
}

impl ResponseCache for SqliteResponseCache {
  fn cache_names(&self) -> Result<Vec<String>> {
    let conn = self.db.conn()?;

    let mut stmt = conn
      .prepare("SELECT DISTINCT cache_name FROM response_cache ORDER BY cache_name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache names: {}", e))?;

    Ok(names)
  }

  fn delete_cache(&self, name: &str) -> Result<bool> {
    let conn = self.db.conn()?;

    let removed = conn
      .execute("DELETE FROM response_cache WHERE cache_name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete cache {}: {}", name, e))?;

    Ok(removed > 0)
  }

  fn get(&self, name: &str, request_key: &str) -> Result<Option<CachedResponse>> {
    let conn = self.db.conn()?;

    let row: Option<EntryRow> = conn
      .query_row(
        "SELECT request_key, status, headers, body, cached_at FROM response_cache
         WHERE cache_name = ? AND request_hash = ?",
        params![name, request_hash(request_key)],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query cache {}: {}", name, e))?;

    row.map(decode_entry).transpose()
  }

  fn get_any(&self, request_key: &str, preferred: &str) -> Result<Option<CachedResponse>> {
    let conn = self.db.conn()?;

    let row: Option<EntryRow> = conn
      .query_row(
        "SELECT request_key, status, headers, body, cached_at FROM response_cache
         WHERE request_hash = ?
         ORDER BY (cache_name = ?) DESC, cache_name
         LIMIT 1",
        params![request_hash(request_key), preferred],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query caches: {}", e))?;

    row.map(decode_entry).transpose()
  }

  fn put(&self, name: &str, entry: &CachedResponse) -> Result<()> {
    let conn = self.db.conn()?;
    insert_entry(&conn, name, entry)
  }

  fn put_all(&self, name: &str, entries: &[CachedResponse]) -> Result<()> {
    let mut conn = self.db.conn()?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for entry in entries {
      insert_entry(&tx, name, entry)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }
}

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Parse a datetime string as stored in the cache table.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  chrono::NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
