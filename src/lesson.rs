//! The lesson record and its construction helpers.
//!
//! A [`Lesson`] is one unit of operational knowledge: a problem/resolution
//! pair with tags, confidence, vote counters, and an optional embedding.
//! Ids are UUID v7 strings issued through a process-wide monotonic context,
//! so two consecutive publishes always produce lexicographically ordered
//! ids even within the same millisecond.

use std::collections::HashSet;
use std::sync::{Mutex, OnceLock};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::{ContextV7, Timestamp, Uuid};

use crate::error::{LoreError, Result};

/// A single lesson learned by an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lesson {
    /// UUID v7 (time-sortable) primary key.
    pub id: String,
    /// What went wrong. Redacted before storage.
    pub problem: String,
    /// How it was fixed. Redacted before storage.
    pub resolution: String,
    /// Optional surrounding detail. Redacted when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Deduplicated labels used for subset filtering at query time.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Author confidence in `[0.0, 1.0]`.
    pub confidence: f64,
    /// Free-form identifier of the producing agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Namespace within an org.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// Embedding vector; absent only when no embedder was configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Lessons past this instant are invisible to queries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub upvotes: u32,
    #[serde(default)]
    pub downvotes: u32,
    /// Opaque structured extension data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl Lesson {
    /// True if the lesson has expired as of `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Text the embedding is computed over: problem, resolution, and
    /// context when present, space-joined.
    pub fn embed_text(&self) -> String {
        match &self.context {
            Some(ctx) => format!("{} {} {}", self.problem, self.resolution, ctx),
            None => format!("{} {}", self.problem, self.resolution),
        }
    }
}

/// Caller-supplied fields for a new lesson; everything else is stamped by
/// the façade at publish time.
#[derive(Debug, Clone, Default)]
pub struct LessonDraft {
    pub problem: String,
    pub resolution: String,
    pub context: Option<String>,
    pub tags: Vec<String>,
    /// Defaults to 0.5 when `None`.
    pub confidence: Option<f64>,
    pub source: Option<String>,
    pub project: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub meta: Option<serde_json::Value>,
}

impl LessonDraft {
    /// Validate the draft per the publish contract.
    pub fn validate(&self) -> Result<()> {
        if self.problem.trim().is_empty() {
            return Err(LoreError::invalid("problem must not be empty"));
        }
        if self.resolution.trim().is_empty() {
            return Err(LoreError::invalid("resolution must not be empty"));
        }
        if let Some(confidence) = self.confidence {
            check_confidence(confidence)?;
        }
        Ok(())
    }
}

/// Reject confidence values outside `[0.0, 1.0]`.
pub fn check_confidence(confidence: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&confidence) {
        return Err(LoreError::invalid(format!(
            "confidence must be between 0.0 and 1.0, got {confidence}"
        )));
    }
    Ok(())
}

/// Coalesce duplicate tags, preserving first-seen order.
pub fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.into_iter()
        .filter(|tag| !tag.is_empty() && seen.insert(tag.clone()))
        .collect()
}

fn id_context() -> &'static Mutex<ContextV7> {
    static CONTEXT: OnceLock<Mutex<ContextV7>> = OnceLock::new();
    CONTEXT.get_or_init(|| Mutex::new(ContextV7::new()))
}

/// Generate a new lesson id.
///
/// UUID v7 encodes the creation timestamp in the leading bits, and the
/// shared [`ContextV7`] counter keeps ids issued in the same millisecond
/// strictly increasing, so string comparison orders ids by creation time.
pub fn generate_id() -> String {
    Uuid::new_v7(Timestamp::now(id_context())).to_string()
}

/// Format a timestamp in the canonical form used for storage: RFC 3339
/// with microsecond precision and a `Z` suffix, so TEXT comparisons in the
/// embedded database order chronologically.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp back; corruption is an integrity failure.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| LoreError::Integrity(format!("bad timestamp {raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic() {
        let ids: Vec<String> = (0..200).map(|_| generate_id()).collect();
        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1], "{} !< {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn tags_coalesce_preserving_order() {
        let tags = vec![
            "stripe".to_string(),
            "rate-limit".to_string(),
            "stripe".to_string(),
            String::new(),
        ];
        assert_eq!(normalize_tags(tags), vec!["stripe", "rate-limit"]);
    }

    #[test]
    fn draft_requires_problem_and_resolution() {
        let draft = LessonDraft {
            problem: "  ".into(),
            resolution: "restart it".into(),
            ..Default::default()
        };
        assert!(draft.validate().is_err());

        let draft = LessonDraft {
            problem: "it broke".into(),
            resolution: String::new(),
            ..Default::default()
        };
        assert!(draft.validate().is_err());
    }

    #[test]
    fn draft_rejects_out_of_range_confidence() {
        let draft = LessonDraft {
            problem: "p".into(),
            resolution: "r".into(),
            confidence: Some(1.5),
            ..Default::default()
        };
        assert!(draft.validate().is_err());
    }

    #[test]
    fn expiry_check() {
        let now = Utc::now();
        let mut lesson = sample_lesson();
        assert!(!lesson.is_expired(now));
        lesson.expires_at = Some(now - chrono::Duration::minutes(1));
        assert!(lesson.is_expired(now));
        lesson.expires_at = Some(now + chrono::Duration::minutes(1));
        assert!(!lesson.is_expired(now));
    }

    #[test]
    fn embed_text_includes_context_when_present(){
        let mut lesson = sample_lesson();
        assert_eq!(lesson.embed_text(), "p r");
        lesson.context = Some("c".into());
        assert_eq!(lesson.embed_text(), "p r c");
    }

    #[test]
    fn timestamp_round_trip() {
        let now = Utc::now();
        let parsed = parse_timestamp(&format_timestamp(now)).unwrap();
        assert!((now - parsed).num_microseconds().unwrap().abs() <= 1);
    }

    fn sample_lesson() -> Lesson {
        let now = Utc::now();
        Lesson {
            id: generate_id(),
            problem: "p".into(),
            resolution: "r".into(),
            context: None,
            tags: vec![],
            confidence: 0.5,
            source: None,
            project: None,
            embedding: None,
            created_at: now,
            updated_at: now,
            expires_at: None,
            upvotes: 0,
            downvotes: 0,
            meta: None,
        }
    }
}
