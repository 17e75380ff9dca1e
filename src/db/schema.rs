/// Schema for the agent's durable state. Applied on every open.
pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- One row per cache generation (version tag)
CREATE TABLE IF NOT EXISTS generations (
    tag TEXT PRIMARY KEY,
    created_at TEXT NOT NULL
);

-- Cached responses, keyed by hashed request key within a generation
CREATE TABLE IF NOT EXISTS cache_entries (
    tag TEXT NOT NULL,
    request_key TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    kind TEXT NOT NULL,
    captured_at TEXT NOT NULL,
    PRIMARY KEY (tag, request_key),
    FOREIGN KEY (tag) REFERENCES generations(tag) ON DELETE CASCADE
);

-- Actions recorded by pages while offline, replayed by the sync coordinator
CREATE TABLE IF NOT EXISTS pending_actions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0
);
"#;
