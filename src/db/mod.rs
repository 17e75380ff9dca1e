pub mod schema;

use chrono::{DateTime, SecondsFormat, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

/// Open or create the database at `path` and apply the schema.
pub fn open(path: &Path) -> Result<Connection> {
  // Ensure parent directory exists
  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent)
      .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
  }

  let conn = Connection::open(path)
    .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;
  run_migrations(&conn)?;

  Ok(conn)
}

/// Private in-memory database, used by tests and `--ephemeral` runs.
pub fn open_in_memory() -> Result<Connection> {
  let conn =
    Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
  run_migrations(&conn)?;
  Ok(conn)
}

/// Get the default database path
pub fn default_path() -> Result<PathBuf> {
  Ok(data_dir()?.join("agent.db"))
}

/// Directory holding the database and log files.
pub fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("offline-agent"))
}

fn run_migrations(conn: &Connection) -> Result<()> {
  conn
    .execute_batch(schema::SCHEMA)
    .map_err(|e| eyre!("Failed to run migrations: {}", e))?;
  Ok(())
}

/// Timestamps are stored as RFC 3339 text so they sort and round-trip exactly.
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
  at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse timestamp '{}': {}", s, e))
}
