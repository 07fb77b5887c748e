//! Server database: orgs, API keys, lessons, and the vector index.
//!
//! The vector column lives in a sqlite-vec `vec0` virtual table declared
//! with the cosine distance metric; the canonical embedding blob is also
//! kept on the `lessons` row so exports read one table. All DDL uses
//! `IF NOT EXISTS` for idempotent initialization.

use std::path::Path;
use std::sync::Once;

use anyhow::{Context, Result};
use rusqlite::Connection;
use sqlite_vec::sqlite3_vec_init;

use crate::embed::EMBEDDING_DIM;

static SQLITE_VEC_INIT: Once = Once::new();

/// Register the sqlite-vec extension globally. Safe to call multiple times.
pub fn load_sqlite_vec() {
    SQLITE_VEC_INIT.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

const SCHEMA_SQL: &str = r#"
-- Tenants
CREATE TABLE IF NOT EXISTS orgs (
    id         TEXT PRIMARY KEY,
    name       TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- Bearer keys; the secret exists only as a SHA-256 hash plus a short
-- displayable prefix
CREATE TABLE IF NOT EXISTS api_keys (
    id           TEXT PRIMARY KEY,
    org_id       TEXT NOT NULL REFERENCES orgs(id),
    name         TEXT NOT NULL,
    key_hash     TEXT NOT NULL UNIQUE,
    key_prefix   TEXT NOT NULL,
    project      TEXT,
    is_root      INTEGER NOT NULL DEFAULT 0,
    role         TEXT,
    user_id      TEXT,
    created_at   TEXT NOT NULL,
    last_used_at TEXT,
    revoked_at   TEXT
);

CREATE INDEX IF NOT EXISTS idx_api_keys_org ON api_keys(org_id);

-- External identities, kept for audit
CREATE TABLE IF NOT EXISTS users (
    id         TEXT PRIMARY KEY,
    subject    TEXT NOT NULL UNIQUE,
    org_id     TEXT NOT NULL REFERENCES orgs(id),
    created_at TEXT NOT NULL
);

-- Lessons, one org each
CREATE TABLE IF NOT EXISTS lessons (
    id          TEXT PRIMARY KEY,
    org_id      TEXT NOT NULL REFERENCES orgs(id),
    problem     TEXT NOT NULL,
    resolution  TEXT NOT NULL,
    context     TEXT,
    tags        TEXT NOT NULL DEFAULT '[]',
    confidence  REAL NOT NULL DEFAULT 0.5 CHECK(confidence >= 0.0 AND confidence <= 1.0),
    source      TEXT,
    project     TEXT,
    embedding   BLOB,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    expires_at  TEXT,
    upvotes     INTEGER NOT NULL DEFAULT 0,
    downvotes   INTEGER NOT NULL DEFAULT 0,
    meta        TEXT
);

CREATE INDEX IF NOT EXISTS idx_lessons_org ON lessons(org_id);
CREATE INDEX IF NOT EXISTS idx_lessons_org_project ON lessons(org_id, project);
CREATE INDEX IF NOT EXISTS idx_lessons_created ON lessons(created_at);
"#;

/// vec0 virtual table must be created separately (sqlite-vec syntax).
fn vec_table_sql() -> String {
    format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS lessons_vec USING vec0(\n\
         id TEXT PRIMARY KEY,\n\
         embedding FLOAT[{EMBEDDING_DIM}] distance_metric=cosine\n\
         );"
    )
}

/// Initialize all schema tables. Idempotent.
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute_batch(&vec_table_sql())?;
    Ok(())
}

/// Open (or create) the server database at the given path, with the vector
/// extension loaded and the schema initialized.
pub fn open_database(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    load_sqlite_vec();

    let conn = Connection::open(path)
        .with_context(|| format!("failed to open database at {}", path.display()))?;

    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "busy_timeout", "5000")?;

    init_schema(&conn).context("failed to initialize schema")?;

    tracing::info!(path = %path.display(), "server database ready");
    Ok(conn)
}

/// Open an in-memory server database (tests).
pub fn open_memory_database() -> Result<Connection> {
    load_sqlite_vec();
    let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    init_schema(&conn).context("failed to initialize schema")?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_creates_all_tables() {
        let conn = open_memory_database().unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"orgs".to_string()));
        assert!(tables.contains(&"api_keys".to_string()));
        assert!(tables.contains(&"users".to_string()));
        assert!(tables.contains(&"lessons".to_string()));

        let version: String = conn
            .query_row("SELECT vec_version()", [], |r| r.get(0))
            .unwrap();
        assert!(!version.is_empty());
    }

    #[test]
    fn schema_is_idempotent() {
        let conn = open_memory_database().unwrap();
        init_schema(&conn).unwrap(); // second run should not error
    }
}
