//! Lesson persistence — one capability set, four backends.
//!
//! [`Store`] is the seam between the façade and storage. The backends are
//! [`memory::MemoryStore`] (a mutex-guarded map), [`sqlite::SqliteStore`]
//! (a single-file embedded database), and [`remote::RemoteStore`] (an HTTP
//! client of the tenant-scoped server, which implements the same contract
//! on the other side). Backends differ only in implementation, never in
//! semantics: tag filters are subset matches, `min_confidence` compares raw
//! confidence, expired lessons never match, and search results order by
//! score, then `created_at`, then id, all descending.

pub mod memory;
pub mod remote;
pub mod sqlite;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::lesson::Lesson;
use crate::score;

/// Filters for [`Store::list`].
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub project: Option<String>,
    pub limit: Option<usize>,
}

/// Parameters for [`Store::search`], alongside the query embedding.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Lessons must carry every one of these tags.
    pub tags: Vec<String>,
    pub project: Option<String>,
    pub limit: usize,
    /// Compared against raw confidence, before decay.
    pub min_confidence: f64,
    /// Half-life for the local time-decay factor.
    pub half_life_days: f64,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            tags: Vec::new(),
            project: None,
            limit: 5,
            min_confidence: 0.0,
            half_life_days: score::DEFAULT_HALF_LIFE_DAYS,
        }
    }
}

/// A lesson with its ranking score.
#[derive(Debug, Clone)]
pub struct ScoredLesson {
    pub lesson: Lesson,
    pub score: f64,
}

/// Direction of a vote increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    Up,
    Down,
}

/// The storage capability set.
///
/// All operations may block on I/O and return typed failures. A closed
/// store must not be reused.
pub trait Store: Send + Sync {
    /// Insert or overwrite by id. Durable before returning in persistent
    /// backends.
    fn save(&self, lesson: &Lesson) -> Result<()>;

    /// Fetch by id.
    fn get(&self, id: &str) -> Result<Option<Lesson>>;

    /// List lessons ordered by `created_at` descending; `limit` applies
    /// after ordering.
    fn list(&self, options: &ListOptions) -> Result<Vec<Lesson>>;

    /// Update the mutable fields (confidence, tags, votes, meta,
    /// `updated_at`). Returns `false` when the id is unknown.
    fn update(&self, lesson: &Lesson) -> Result<bool>;

    /// Delete by id. Returns `false` when the id is unknown.
    fn delete(&self, id: &str) -> Result<bool>;

    /// Hybrid retrieval: filter, score, and return the top results.
    fn search(&self, embedding: &[f32], options: &SearchOptions) -> Result<Vec<ScoredLesson>>;

    /// Apply a single vote increment. Returns `false` when the id is
    /// unknown.
    ///
    /// The default is the two-step fetch-modify-save used by local stores;
    /// backends with an atomic increment (SQL `SET upvotes = upvotes + 1`,
    /// the server's `"+1"` sentinel) override it.
    fn increment_vote(&self, id: &str, vote: Vote) -> Result<bool> {
        let Some(mut lesson) = self.get(id)? else {
            return Ok(false);
        };
        match vote {
            Vote::Up => lesson.upvotes += 1,
            Vote::Down => lesson.downvotes += 1,
        }
        lesson.updated_at = Utc::now();
        self.update(&lesson)
    }

    /// Every record the caller can see, embeddings included, suitable for
    /// a round-trip through import. The remote store overrides this with
    /// the server's bulk endpoint.
    fn export(&self) -> Result<Vec<Lesson>> {
        self.list(&ListOptions::default())
    }

    /// Release backing resources. Idempotent.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// True when `wanted` is a subset of the lesson's tags.
pub(crate) fn tags_match(lesson_tags: &[String], wanted: &[String]) -> bool {
    wanted.iter().all(|tag| lesson_tags.iter().any(|t| t == tag))
}

/// Shared ranking pipeline for the local stores: drop expired, vectorless,
/// tag-mismatched, and under-confidence candidates, score the rest, and
/// return the top `limit` in deterministic order.
pub(crate) fn rank_candidates(
    candidates: Vec<Lesson>,
    embedding: &[f32],
    options: &SearchOptions,
    now: DateTime<Utc>,
) -> Vec<ScoredLesson> {
    let mut hits: Vec<ScoredLesson> = candidates
        .into_iter()
        .filter(|lesson| !lesson.is_expired(now))
        .filter(|lesson| tags_match(&lesson.tags, &options.tags))
        .filter(|lesson| lesson.confidence >= options.min_confidence)
        .filter_map(|lesson| {
            let vector = lesson.embedding.as_deref()?;
            let cosine_sim = score::cosine(embedding, vector);
            let age_days = (now - lesson.created_at).num_milliseconds() as f64 / 86_400_000.0;
            let value = score::final_score(
                cosine_sim,
                lesson.confidence,
                age_days.max(0.0),
                lesson.upvotes,
                lesson.downvotes,
                options.half_life_days,
            );
            Some(ScoredLesson {
                lesson,
                score: value,
            })
        })
        .collect();

    sort_hits(&mut hits);
    hits.truncate(options.limit);
    hits
}

/// Order hits by score descending, ties by `created_at` then id, both
/// descending.
pub(crate) fn sort_hits(hits: &mut [ScoredLesson]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.lesson.created_at.cmp(&a.lesson.created_at))
            .then_with(|| b.lesson.id.cmp(&a.lesson.id))
    });
}
