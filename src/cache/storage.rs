//! SQLite implementation of the cache generation store.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::sync::{Mutex, MutexGuard};

use super::key::RequestKey;
use super::traits::CacheStore;
use crate::db;
use crate::fetch::{Response, ResponseKind};

/// SQLite-based cache storage implementation.
pub struct SqliteCacheStore {
  conn: Mutex<Connection>,
}

impl SqliteCacheStore {
  /// Wrap a connection that already has the schema applied (see [`db::open`]).
  pub fn new(conn: Connection) -> Self {
    Self {
      conn: Mutex::new(conn),
    }
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

fn ensure_generation(conn: &Connection, tag: &str) -> Result<()> {
  conn
    .execute(
      "INSERT OR IGNORE INTO generations (tag, created_at) VALUES (?, ?)",
      params![tag, db::format_timestamp(&Utc::now())],
    )
    .map_err(|e| eyre!("Failed to create generation {}: {}", tag, e))?;
  Ok(())
}

fn write_entry(tx: &Transaction<'_>, tag: &str, key: &RequestKey, response: &Response) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  tx.execute(
    "INSERT OR REPLACE INTO cache_entries
       (tag, request_key, method, url, status, status_text, headers, body, kind, captured_at)
     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    params![
      tag,
      key.cache_hash(),
      key.method().as_str(),
      key.url().as_str(),
      response.status,
      response.status_text,
      headers,
      response.body,
      response.kind.as_str(),
      db::format_timestamp(&response.captured_at),
    ],
  )
  .map_err(|e| eyre!("Failed to store entry for {}: {}", key.url(), e))?;
  Ok(())
}

impl CacheStore for SqliteCacheStore {
  fn open_generation(&self, tag: &str) -> Result<()> {
    let conn = self.lock()?;
    ensure_generation(&conn, tag)
  }

  fn get(&self, tag: &str, key: &RequestKey) -> Result<Option<Response>> {
    let conn = self.lock()?;

    let row: Option<(u16, String, String, Vec<u8>, String, String)> = conn
      .query_row(
        "SELECT status, status_text, headers, body, kind, captured_at FROM cache_entries
         WHERE tag = ? AND request_key = ?",
        params![tag, key.cache_hash()],
        |row| {
          Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
          ))
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to query cache entry: {}", e))?;

    let Some((status, status_text, headers, body, kind, captured_at)) = row else {
      return Ok(None);
    };

    let headers: Vec<(String, String)> = serde_json::from_str(&headers)
      .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;
    let kind: ResponseKind = kind.parse().map_err(|e: String| eyre!(e))?;

    Ok(Some(Response {
      status,
      status_text,
      headers,
      body,
      kind,
      captured_at: db::parse_timestamp(&captured_at)?,
    }))
  }

  fn put(&self, tag: &str, key: &RequestKey, response: &Response) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    ensure_generation(&tx, tag)?;
    write_entry(&tx, tag, key, response)?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))
  }

  fn put_existing(&self, tag: &str, key: &RequestKey, response: &Response) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let exists: bool = tx
      .query_row(
        "SELECT EXISTS (SELECT 1 FROM generations WHERE tag = ?)",
        params![tag],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to look up generation {}: {}", tag, e))?;
    if !exists {
      return Ok(false);
    }
    write_entry(&tx, tag, key, response)?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(true)
  }

  fn install_generation(&self, tag: &str, entries: &[(RequestKey, Response)]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    ensure_generation(&tx, tag)?;
    for (key, response) in entries {
      write_entry(&tx, tag, key, response)?;
    }

    // Dropping the transaction on an early return rolls everything back
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))
  }

  fn list_generation_tags(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT tag FROM generations ORDER BY created_at, tag")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let tags = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list generations: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read generation tag: {}", e))?;

    Ok(tags)
  }

  fn delete(&self, tag: &str) -> Result<bool> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM cache_entries WHERE tag = ?", params![tag])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", tag, e))?;
    let removed = tx
      .execute("DELETE FROM generations WHERE tag = ?", params![tag])
      .map_err(|e| eyre!("Failed to delete generation {}: {}", tag, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  fn store() -> SqliteCacheStore {
    SqliteCacheStore::new(db::open_in_memory().unwrap())
  }

  fn key(path: &str) -> RequestKey {
    RequestKey::get(&Url::parse("https://app.example").unwrap().join(path).unwrap())
  }

  fn response(body: &str) -> Response {
    Response::new(200, body)
      .with_header("Content-Type", "text/css")
      .with_header("ETag", "\"abc\"")
  }

  #[test]
  fn test_put_then_get_returns_same_response() {
    let store = store();
    let resp = response("body { color: red }");

    store.put("v1", &key("/a.css"), &resp).unwrap();
    let got = store.get("v1", &key("/a.css")).unwrap().unwrap();

    assert_eq!(got, resp);
    assert_eq!(got.header("etag"), Some("\"abc\""));
  }

  #[test]
  fn test_put_is_last_write_wins() {
    let store = store();
    store.put("v1", &key("/a.css"), &response("old")).unwrap();
    store.put("v1", &key("/a.css"), &response("new")).unwrap();

    let got = store.get("v1", &key("/a.css")).unwrap().unwrap();
    assert_eq!(got.body, b"new");
  }

  #[test]
  fn test_generations_are_isolated() {
    let store = store();
    store.put("v1", &key("/a.css"), &response("one")).unwrap();

    assert!(store.get("v2", &key("/a.css")).unwrap().is_none());
    assert!(store.get("v1", &key("/missing")).unwrap().is_none());
  }

  #[test]
  fn test_delete_removes_generation_and_entries() {
    let store = store();
    store.put("v1", &key("/a.css"), &response("one")).unwrap();
    store.open_generation("v2").unwrap();

    assert!(store.delete("v1").unwrap());
    assert!(!store.delete("v1").unwrap());
    assert_eq!(store.list_generation_tags().unwrap(), vec!["v2".to_string()]);
    assert!(store.get("v1", &key("/a.css")).unwrap().is_none());
  }

  #[test]
  fn test_install_generation_writes_all_entries() {
    let store = store();
    let entries = vec![
      (key("/"), response("index")),
      (key("/offline.html"), response("offline")),
    ];

    store.install_generation("v1", &entries).unwrap();

    assert_eq!(store.list_generation_tags().unwrap(), vec!["v1".to_string()]);
    for (k, r) in &entries {
      assert_eq!(store.get("v1", k).unwrap().as_ref(), Some(r));
    }
  }

  #[test]
  fn test_put_existing_never_recreates_generation() {
    let store = store();
    store.put("v1", &key("/a.css"), &response("one")).unwrap();

    assert!(store.put_existing("v1", &key("/b.css"), &response("two")).unwrap());
    assert_eq!(store.get("v1", &key("/b.css")).unwrap().unwrap().body, b"two");

    store.delete("v1").unwrap();
    assert!(!store.put_existing("v1", &key("/c.css"), &response("late")).unwrap());
    assert!(store.list_generation_tags().unwrap().is_empty());
    assert!(store.get("v1", &key("/c.css")).unwrap().is_none());
  }

  #[test]
  fn test_open_generation_is_idempotent() {
    let store = store();
    store.open_generation("v1").unwrap();
    store.open_generation("v1").unwrap();
    assert_eq!(store.list_generation_tags().unwrap().len(), 1);
  }
}
