//! The `Lore` façade — composition root for redaction, embedding, and
//! storage.
//!
//! A [`Lore`] instance owns one store, an optional redactor, and an
//! optional embedder, chosen at construction and fixed for its lifetime.
//! Publish scrubs text before anything touches storage; query embeds the
//! caller's text and delegates ranking to the store.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;

use crate::embed::{self, Embedder};
use crate::error::{LoreError, Result};
use crate::lesson::{self, Lesson, LessonDraft};
use crate::redact::Redactor;
use crate::score::DEFAULT_HALF_LIFE_DAYS;
use crate::store::{
    remote::RemoteStore, sqlite::SqliteStore, ListOptions, ScoredLesson, SearchOptions, Store,
    Vote,
};

/// A ranked query hit.
pub type QueryResult = ScoredLesson;

/// Options for [`Lore::query`].
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Returned lessons must carry every one of these tags.
    pub tags: Vec<String>,
    pub limit: usize,
    /// Applied to raw confidence, before decay.
    pub min_confidence: f64,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            tags: Vec::new(),
            limit: 5,
            min_confidence: 0.0,
        }
    }
}

/// Builder for [`Lore`].
pub struct LoreBuilder {
    project: Option<String>,
    db_path: Option<PathBuf>,
    store: Option<Box<dyn Store>>,
    remote: Option<(String, String)>,
    embedder: Option<Arc<dyn Embedder>>,
    redact: bool,
    redact_patterns: Vec<(String, String)>,
    half_life_days: f64,
}

impl Default for LoreBuilder {
    fn default() -> Self {
        Self {
            project: None,
            db_path: None,
            store: None,
            remote: None,
            embedder: None,
            redact: true,
            redact_patterns: Vec::new(),
            half_life_days: DEFAULT_HALF_LIFE_DAYS,
        }
    }
}

impl LoreBuilder {
    /// Default project stamped on publishes and used as the list/query
    /// filter.
    pub fn project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    /// Path of the embedded database (ignored when a store is supplied).
    pub fn db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = Some(path.into());
        self
    }

    /// Use a pre-constructed store.
    pub fn store(mut self, store: Box<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use the remote server at `api_url` with `api_key`.
    pub fn remote(mut self, api_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        self.remote = Some((api_url.into(), api_key.into()));
        self
    }

    /// Embedding function used for publish and query.
    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Disable redaction entirely (on by default).
    pub fn redact(mut self, enabled: bool) -> Self {
        self.redact = enabled;
        self
    }

    /// Additional `(pattern, label)` layers on top of the defaults.
    pub fn redact_patterns(mut self, patterns: Vec<(String, String)>) -> Self {
        self.redact_patterns = patterns;
        self
    }

    /// Override the 30-day decay half-life.
    pub fn decay_half_life_days(mut self, days: f64) -> Self {
        self.half_life_days = days;
        self
    }

    pub fn build(self) -> Result<Lore> {
        let redactor = if self.redact {
            Some(Redactor::with_patterns(&self.redact_patterns)?)
        } else {
            None
        };

        let store: Box<dyn Store> = match (self.store, self.remote) {
            (Some(store), _) => store,
            (None, Some((api_url, api_key))) => Box::new(RemoteStore::new(&api_url, &api_key)?),
            (None, None) => {
                let path = match self.db_path {
                    Some(path) => path,
                    None => default_db_path()?,
                };
                Box::new(SqliteStore::open(path)?)
            }
        };

        Ok(Lore {
            project: self.project,
            redactor,
            embedder: self.embedder,
            store,
            half_life_days: self.half_life_days,
        })
    }
}

/// Default embedded database location: `~/.lore/lessons.db`.
pub fn default_db_path() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| LoreError::invalid("cannot determine home directory; set db_path"))?;
    Ok(home.join(".lore").join("lessons.db"))
}

/// Cross-agent lesson memory.
pub struct Lore {
    project: Option<String>,
    redactor: Option<Redactor>,
    embedder: Option<Arc<dyn Embedder>>,
    store: Box<dyn Store>,
    half_life_days: f64,
}

impl Lore {
    pub fn builder() -> LoreBuilder {
        LoreBuilder::default()
    }

    fn scrub(&self, text: &str) -> String {
        match &self.redactor {
            Some(redactor) => redactor.run(text),
            None => text.to_string(),
        }
    }

    /// Publish a new lesson. Returns its id.
    ///
    /// Text fields are redacted before the embedding is computed, so no
    /// sensitive span reaches storage in either form.
    pub fn publish(&self, draft: LessonDraft) -> Result<String> {
        draft.validate()?;

        let problem = self.scrub(&draft.problem);
        let resolution = self.scrub(&draft.resolution);
        let context = draft.context.as_deref().map(|c| self.scrub(c));

        // One timestamp captures both created_at and updated_at.
        let now = Utc::now();
        let mut lesson = Lesson {
            id: lesson::generate_id(),
            problem,
            resolution,
            context,
            tags: lesson::normalize_tags(draft.tags),
            confidence: draft.confidence.unwrap_or(0.5),
            source: draft.source,
            project: draft.project.or_else(|| self.project.clone()),
            embedding: None,
            created_at: now,
            updated_at: now,
            expires_at: draft.expires_at,
            upvotes: 0,
            downvotes: 0,
            meta: draft.meta,
        };

        if let Some(embedder) = &self.embedder {
            let vector = embedder.embed(&lesson.embed_text())?;
            embed::check_dimension(&vector)?;
            lesson.embedding = Some(vector);
        }

        tracing::debug!(id = %lesson.id, project = ?lesson.project, "publishing lesson");
        self.store.save(&lesson)?;
        Ok(lesson.id)
    }

    /// Query lessons by semantic similarity, ranked by score descending.
    ///
    /// Returns an empty list (not an error) when nothing matches.
    pub fn query(&self, text: &str, options: &QueryOptions) -> Result<Vec<QueryResult>> {
        let embedder = self
            .embedder
            .as_ref()
            .ok_or_else(|| LoreError::invalid("query requires an embedding function"))?;

        let vector = embedder.embed(text)?;
        embed::check_dimension(&vector)?;

        self.store.search(
            &vector,
            &SearchOptions {
                tags: options.tags.clone(),
                project: self.project.clone(),
                limit: options.limit,
                min_confidence: options.min_confidence,
                half_life_days: self.half_life_days,
            },
        )
    }

    /// Increment a lesson's upvote counter.
    pub fn upvote(&self, id: &str) -> Result<()> {
        self.vote(id, Vote::Up)
    }

    /// Increment a lesson's downvote counter.
    pub fn downvote(&self, id: &str) -> Result<()> {
        self.vote(id, Vote::Down)
    }

    fn vote(&self, id: &str, vote: Vote) -> Result<()> {
        if self.store.increment_vote(id, vote)? {
            Ok(())
        } else {
            Err(LoreError::LessonNotFound(id.to_string()))
        }
    }

    /// Fetch a lesson by id.
    pub fn get(&self, id: &str) -> Result<Option<Lesson>> {
        self.store.get(id)
    }

    /// List lessons, newest first. `project: None` falls back to the
    /// configured default project.
    pub fn list(&self, project: Option<&str>, limit: Option<usize>) -> Result<Vec<Lesson>> {
        self.store.list(&ListOptions {
            project: project.map(String::from).or_else(|| self.project.clone()),
            limit,
        })
    }

    /// Delete a lesson by id. Returns whether it existed.
    pub fn delete(&self, id: &str) -> Result<bool> {
        self.store.delete(id)
    }

    /// Export full lesson records (embeddings included) for a round-trip
    /// through [`Lore::import_lessons`].
    pub fn export_lessons(&self) -> Result<Vec<Lesson>> {
        let mut lessons = self.store.export()?;
        if let Some(project) = &self.project {
            lessons.retain(|lesson| lesson.project.as_deref() == Some(project));
        }
        Ok(lessons)
    }

    /// Import records, skipping ids that already exist. Lessons arriving
    /// without a vector are re-embedded when an embedder is configured.
    /// Returns the number inserted.
    pub fn import_lessons(&self, lessons: &[Lesson]) -> Result<usize> {
        let mut imported = 0;
        for record in lessons {
            // Duplicates are skipped before anything else, so a stored
            // record that would no longer validate cannot abort the batch.
            if self.store.get(&record.id)?.is_some() {
                continue;
            }
            lesson::check_confidence(record.confidence)?;
            if let Some(vector) = &record.embedding {
                embed::check_dimension(vector)?;
            }

            let mut record = record.clone();
            if record.embedding.is_none() {
                if let Some(embedder) = &self.embedder {
                    let vector = embedder.embed(&record.embed_text())?;
                    embed::check_dimension(&vector)?;
                    record.embedding = Some(vector);
                }
            }
            self.store.save(&record)?;
            imported += 1;
        }
        Ok(imported)
    }

    /// Render query results as a prompt fragment within a token budget
    /// (estimated at four characters per token).
    pub fn as_prompt(&self, results: &[QueryResult], max_tokens: usize) -> String {
        if results.is_empty() {
            return String::new();
        }

        let budget_chars = max_tokens * 4;
        let mut out = String::from("Lessons from previous runs:\n");
        for (i, hit) in results.iter().enumerate() {
            let entry = format!(
                "{}. Problem: {}\n   Resolution: {}\n",
                i + 1,
                hit.lesson.problem,
                hit.lesson.resolution
            );
            if i > 0 && out.len() + entry.len() > budget_chars {
                break;
            }
            out.push_str(&entry);
        }
        out
    }

    /// Release the underlying store.
    pub fn close(&self) -> Result<()> {
        self.store.close()
    }
}
