//! Embedded single-file SQLite store.
//!
//! Embeddings are stored as `4 * D`-byte little-endian f32 blobs, the same
//! bytes the canonical codec in [`crate::embed`] produces. Hybrid search
//! pre-filters candidates in SQL (project, raw confidence, expiry, a tag
//! LIKE pre-cut) and computes cosine plus decay in application code via the
//! shared ranking pipeline.

use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection, Row};

use crate::embed::{self, EMBEDDING_DIM};
use crate::error::{LoreError, Result};
use crate::lesson::{format_timestamp, parse_timestamp, Lesson};

use super::{rank_candidates, ListOptions, ScoredLesson, SearchOptions, Store, Vote};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS lessons (
    id          TEXT PRIMARY KEY,
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

CREATE INDEX IF NOT EXISTS idx_lessons_project ON lessons(project);
CREATE INDEX IF NOT EXISTS idx_lessons_created ON lessons(created_at);
CREATE INDEX IF NOT EXISTS idx_lessons_tags ON lessons(tags);
"#;

const LESSON_COLUMNS: &str = "id, problem, resolution, context, tags, confidence, source, \
     project, embedding, created_at, updated_at, expires_at, upvotes, downvotes, meta";

/// SQLite-backed lesson store.
pub struct SqliteStore {
    conn: Mutex<Option<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`, creating parent
    /// directories, enabling WAL journaling, and initializing the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", "5000")?;
        conn.execute_batch(SCHEMA_SQL)?;

        tracing::debug!(path = %path.display(), "lesson database ready");
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Open a private in-memory database (tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(conn) => f(conn),
            None => Err(LoreError::invalid("store is closed")),
        }
    }
}

impl SqliteStore {
    /// Decode one `SELECT {LESSON_COLUMNS}` row into a [`Lesson`].
    fn read_lesson(row: &Row<'_>) -> Result<Lesson> {
        let tags_raw: String = row.get(4)?;
        let blob: Option<Vec<u8>> = row.get(8)?;
        let created_raw: String = row.get(9)?;
        let updated_raw: String = row.get(10)?;
        let expires_raw: Option<String> = row.get(11)?;
        let meta_raw: Option<String> = row.get(14)?;

        let embedding = match blob {
            Some(bytes) => {
                let vector = embed::bytes_to_vector(&bytes)?;
                if vector.len() != EMBEDDING_DIM {
                    let id: String = row.get(0)?;
                    return Err(LoreError::Integrity(format!(
                        "lesson {id} has a {}-dimension embedding, expected {EMBEDDING_DIM}",
                        vector.len(),
                    )));
                }
                Some(vector)
            }
            None => None,
        };

        Ok(Lesson {
            id: row.get(0)?,
            problem: row.get(1)?,
            resolution: row.get(2)?,
            context: row.get(3)?,
            tags: serde_json::from_str(&tags_raw)?,
            confidence: row.get(5)?,
            source: row.get(6)?,
            project: row.get(7)?,
            embedding,
            created_at: parse_timestamp(&created_raw)?,
            updated_at: parse_timestamp(&updated_raw)?,
            expires_at: expires_raw.as_deref().map(parse_timestamp).transpose()?,
            upvotes: row.get(12)?,
            downvotes: row.get(13)?,
            meta: meta_raw.and_then(|s| serde_json::from_str(&s).ok()),
        })
    }
}

impl Store for SqliteStore {
    fn save(&self, lesson: &Lesson) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO lessons \
                 (id, problem, resolution, context, tags, confidence, source, project, \
                  embedding, created_at, updated_at, expires_at, upvotes, downvotes, meta) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    lesson.id,
                    lesson.problem,
                    lesson.resolution,
                    lesson.context,
                    serde_json::to_string(&lesson.tags)?,
                    lesson.confidence,
                    lesson.source,
                    lesson.project,
                    lesson.embedding.as_deref().map(embed::vector_to_bytes),
                    format_timestamp(lesson.created_at),
                    format_timestamp(lesson.updated_at),
                    lesson.expires_at.map(format_timestamp),
                    lesson.upvotes,
                    lesson.downvotes,
                    lesson
                        .meta
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?,
                ],
            )?;
            Ok(())
        })
    }

    fn get(&self, id: &str) -> Result<Option<Lesson>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {LESSON_COLUMNS} FROM lessons WHERE id = ?1"
            ))?;
            let mut rows = stmt.query(params![id])?;
            match rows.next()? {
                Some(row) => Ok(Some(Self::read_lesson(row)?)),
                None => Ok(None),
            }
        })
    }

    fn list(&self, options: &ListOptions) -> Result<Vec<Lesson>> {
        self.with_conn(|conn| {
            let mut sql = format!("SELECT {LESSON_COLUMNS} FROM lessons");
            let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
            if let Some(project) = &options.project {
                sql.push_str(" WHERE project = ?1");
                values.push(Box::new(project.clone()));
            }
            sql.push_str(" ORDER BY created_at DESC, id DESC");
            if let Some(limit) = options.limit {
                values.push(Box::new(limit as i64));
                sql.push_str(&format!(" LIMIT ?{}", values.len()));
            }

            let mut stmt = conn.prepare(&sql)?;
            let mut rows =
                stmt.query(rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())))?;
            let mut lessons = Vec::new();
            while let Some(row) = rows.next()? {
                lessons.push(Self::read_lesson(row)?);
            }
            Ok(lessons)
        })
    }

    fn update(&self, lesson: &Lesson) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE lessons SET confidence = ?1, tags = ?2, upvotes = ?3, \
                 downvotes = ?4, meta = ?5, updated_at = ?6 WHERE id = ?7",
                params![
                    lesson.confidence,
                    serde_json::to_string(&lesson.tags)?,
                    lesson.upvotes,
                    lesson.downvotes,
                    lesson
                        .meta
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?,
                    format_timestamp(lesson.updated_at),
                    lesson.id,
                ],
            )?;
            Ok(changed > 0)
        })
    }

    fn delete(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM lessons WHERE id = ?1", params![id])?;
            Ok(changed > 0)
        })
    }

    fn search(&self, embedding: &[f32], options: &SearchOptions) -> Result<Vec<ScoredLesson>> {
        let now = Utc::now();
        let candidates = self.with_conn(|conn| {
            let mut sql = format!(
                "SELECT {LESSON_COLUMNS} FROM lessons \
                 WHERE embedding IS NOT NULL AND confidence >= ?1 \
                 AND (expires_at IS NULL OR expires_at > ?2)"
            );
            let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![
                Box::new(options.min_confidence),
                Box::new(format_timestamp(now)),
            ];
            if let Some(project) = &options.project {
                values.push(Box::new(project.clone()));
                sql.push_str(&format!(" AND project = ?{}", values.len()));
            }
            // Cheap pre-cut on the JSON tag column; the subset check in the
            // ranking pipeline stays authoritative.
            for tag in &options.tags {
                values.push(Box::new(format!("%\"{tag}\"%")));
                sql.push_str(&format!(" AND tags LIKE ?{}", values.len()));
            }

            let mut stmt = conn.prepare(&sql)?;
            let mut rows =
                stmt.query(rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())))?;
            let mut candidates = Vec::new();
            while let Some(row) = rows.next()? {
                candidates.push(Self::read_lesson(row)?);
            }
            Ok(candidates)
        })?;

        Ok(rank_candidates(candidates, embedding, options, now))
    }

    fn increment_vote(&self, id: &str, vote: Vote) -> Result<bool> {
        // Single transactional increment; concurrent votes both land.
        self.with_conn(|conn| {
            let column = match vote {
                Vote::Up => "upvotes",
                Vote::Down => "downvotes",
            };
            let changed = conn.execute(
                &format!(
                    "UPDATE lessons SET {column} = {column} + 1, updated_at = ?1 WHERE id = ?2"
                ),
                params![format_timestamp(Utc::now()), id],
            )?;
            Ok(changed > 0)
        })
    }

    fn close(&self) -> Result<()> {
        let mut guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(conn) = guard.take() {
            conn.close().map_err(|(_, e)| LoreError::from(e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lesson::generate_id;
    use crate::store::SearchOptions;

    fn axis(i: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        v[i] = 1.0;
        v
    }

    fn lesson(tags: &[&str], embedding: Vec<f32>) -> Lesson {
        let now = Utc::now();
        Lesson {
            id: generate_id(),
            problem: "p".into(),
            resolution: "r".into(),
            context: Some("ctx".into()),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            confidence: 0.8,
            source: Some("agent-1".into()),
            project: Some("alpha".into()),
            embedding: Some(embedding),
            created_at: now,
            updated_at: now,
            expires_at: None,
            upvotes: 0,
            downvotes: 0,
            meta: Some(serde_json::json!({"k": "v"})),
        }
    }

    #[test]
    fn save_get_round_trips_every_field() {
        let store = SqliteStore::open_in_memory().unwrap();
        let original = lesson(&["a", "b"], axis(3));
        store.save(&original).unwrap();

        let fetched = store.get(&original.id).unwrap().unwrap();
        assert_eq!(fetched.problem, original.problem);
        assert_eq!(fetched.tags, original.tags);
        assert_eq!(fetched.embedding, original.embedding);
        assert_eq!(fetched.meta, original.meta);
        // Stored timestamps carry microsecond precision.
        assert_eq!(
            format_timestamp(fetched.created_at),
            format_timestamp(original.created_at)
        );
        assert_eq!(fetched.source.as_deref(), Some("agent-1"));
    }

    #[test]
    fn get_unknown_is_none() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.get("nope").unwrap().is_none());
    }

    #[test]
    fn save_overwrites_by_id() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut l = lesson(&[], axis(0));
        store.save(&l).unwrap();
        l.resolution = "retry with backoff".into();
        store.save(&l).unwrap();

        let fetched = store.get(&l.id).unwrap().unwrap();
        assert_eq!(fetched.resolution, "retry with backoff");
        assert_eq!(store.list(&ListOptions::default()).unwrap().len(), 1);
    }

    #[test]
    fn search_filters_tags_in_sql_and_ranks() {
        let store = SqliteStore::open_in_memory().unwrap();
        let tagged = lesson(&["stripe", "rate-limit"], axis(0));
        let untagged = lesson(&["stripe"], axis(0));
        store.save(&tagged).unwrap();
        store.save(&untagged).unwrap();

        let options = SearchOptions {
            tags: vec!["stripe".into(), "rate-limit".into()],
            ..Default::default()
        };
        let hits = store.search(&axis(0), &options).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].lesson.id, tagged.id);
        assert!(hits[0].score > 0.0);
    }

    #[test]
    fn search_excludes_expired_in_sql() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut stale = lesson(&[], axis(0));
        stale.expires_at = Some(Utc::now() - chrono::Duration::minutes(1));
        store.save(&stale).unwrap();

        let hits = store.search(&axis(0), &SearchOptions::default()).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn transactional_vote_increment() {
        let store = SqliteStore::open_in_memory().unwrap();
        let l = lesson(&[], axis(0));
        store.save(&l).unwrap();

        for _ in 0..5 {
            assert!(store.increment_vote(&l.id, Vote::Up).unwrap());
        }
        assert!(!store.increment_vote("missing", Vote::Down).unwrap());

        let fetched = store.get(&l.id).unwrap().unwrap();
        assert_eq!(fetched.upvotes, 5);
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lessons.db");

        let l = lesson(&[], axis(1));
        {
            let store = SqliteStore::open(&path).unwrap();
            store.save(&l).unwrap();
            store.close().unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let fetched = store.get(&l.id).unwrap().unwrap();
        assert_eq!(fetched.embedding, l.embedding);
    }

    #[test]
    fn close_is_idempotent_and_blocks_reuse() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.close().unwrap();
        store.close().unwrap();
        assert!(store.get("x").is_err());
    }

    #[test]
    fn corrupt_blob_is_integrity_error() {
        let store = SqliteStore::open_in_memory().unwrap();
        let l = lesson(&[], axis(0));
        store.save(&l).unwrap();
        store
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE lessons SET embedding = ?1 WHERE id = ?2",
                    params![vec![1u8, 2, 3], l.id],
                )?;
                Ok(())
            })
            .unwrap();

        let err = store.get(&l.id).unwrap_err();
        assert!(matches!(err, LoreError::Integrity(_)));
    }
}
