//! Durable queue of actions recorded while offline.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Mutex, MutexGuard};

use crate::db;

/// One user mutation waiting to be applied remotely.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingAction {
  pub id: i64,
  /// Opaque to the agent, forwarded verbatim to the sync endpoint
  pub payload: Value,
  pub created_at: DateTime<Utc>,
  pub retry_count: u32,
}

/// Storage contract for pending actions.
pub trait ActionQueue: Send + Sync {
  /// Record a new action. Called by application code, not by the sync path.
  fn enqueue(&self, payload: &Value) -> Result<PendingAction>;

  /// All pending actions, oldest first.
  fn list(&self) -> Result<Vec<PendingAction>>;

  /// Drop an action once it has been applied remotely.
  fn remove(&self, id: i64) -> Result<()>;

  /// Note a failed attempt; the action stays queued.
  fn record_failure(&self, id: i64) -> Result<()>;
}

/// SQLite-backed action queue. Survives restarts when opened on a file.
pub struct SqliteActionQueue {
  conn: Mutex<Connection>,
}

impl SqliteActionQueue {
  pub fn new(conn: Connection) -> Self {
    Self {
      conn: Mutex::new(conn),
    }
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl ActionQueue for SqliteActionQueue {
  fn enqueue(&self, payload: &Value) -> Result<PendingAction> {
    let conn = self.lock()?;
    let created_at = Utc::now();
    let data =
      serde_json::to_string(payload).map_err(|e| eyre!("Failed to serialize action: {}", e))?;

    conn
      .execute(
        "INSERT INTO pending_actions (payload, created_at, retry_count) VALUES (?, ?, 0)",
        params![data, db::format_timestamp(&created_at)],
      )
      .map_err(|e| eyre!("Failed to enqueue action: {}", e))?;

    Ok(PendingAction {
      id: conn.last_insert_rowid(),
      payload: payload.clone(),
      created_at,
      retry_count: 0,
    })
  }

  fn list(&self) -> Result<Vec<PendingAction>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare(
        "SELECT id, payload, created_at, retry_count FROM pending_actions
         ORDER BY id",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, i64>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
          row.get::<_, u32>(3)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query actions: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read action: {}", e))?;

    rows
      .into_iter()
      .map(|(id, payload, created_at, retry_count)| {
        Ok(PendingAction {
          id,
          payload: serde_json::from_str(&payload)
            .map_err(|e| eyre!("Failed to deserialize action {}: {}", id, e))?,
          created_at: db::parse_timestamp(&created_at)?,
          retry_count,
        })
      })
      .collect()
  }

  fn remove(&self, id: i64) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute("DELETE FROM pending_actions WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove action {}: {}", id, e))?;
    Ok(())
  }

  fn record_failure(&self, id: i64) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "UPDATE pending_actions SET retry_count = retry_count + 1 WHERE id = ?",
        params![id],
      )
      .map_err(|e| eyre!("Failed to update action {}: {}", id, e))?;
    Ok(())
  }
}
