//! Request and response bodies shared by the HTTP server and the remote
//! store client.
//!
//! Embeddings travel as JSON arrays of numbers, always of the configured
//! dimension. Vote counters in a patch body accept either an absolute value
//! or the `"+1"` sentinel, which the server applies as a single atomic SQL
//! increment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::lesson::Lesson;

/// Standard error body: a stable machine code plus human-readable text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

/// Body for `POST /v1/lessons`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateLessonBody {
    /// Client-assigned id. The server keeps it (publishers hand out ids
    /// before the round-trip completes) or assigns its own when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub problem: String,
    pub resolution: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

fn default_confidence() -> f64 {
    0.5
}

/// Response for `POST /v1/lessons`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateLessonResponse {
    pub id: String,
}

/// A vote counter in a patch body: absolute value or `"+1"` increment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VoteField {
    Increment(String),
    Set(u32),
}

impl VoteField {
    /// The atomic increment sentinel.
    pub fn increment() -> Self {
        Self::Increment("+1".to_string())
    }
}

/// Body for `PATCH /v1/lessons/{id}`. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateLessonBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upvotes: Option<VoteField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downvotes: Option<VoteField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl UpdateLessonBody {
    pub fn is_empty(&self) -> bool {
        self.confidence.is_none()
            && self.tags.is_none()
            && self.upvotes.is_none()
            && self.downvotes.is_none()
            && self.meta.is_none()
    }
}

/// Response for `GET /v1/lessons`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonListResponse {
    pub lessons: Vec<Lesson>,
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
}

/// Body for `POST /v1/lessons/search`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchBody {
    pub embedding: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default = "default_search_limit")]
    pub limit: u32,
    #[serde(default)]
    pub min_confidence: f64,
}

fn default_search_limit() -> u32 {
    5
}

/// One search hit: the lesson plus its opaque ranking score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub lesson: Lesson,
    pub score: f64,
}

/// Response for `POST /v1/lessons/search`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub lessons: Vec<SearchHit>,
}

/// Response for `POST /v1/lessons/export`; embeddings included so the
/// records round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportResponse {
    pub lessons: Vec<Lesson>,
}

/// Body for `POST /v1/lessons/import`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportBody {
    pub lessons: Vec<Lesson>,
}

/// Response for `POST /v1/lessons/import`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportResponse {
    pub imported: u64,
}

/// Body for `POST /v1/org/init`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgInitBody {
    pub name: String,
}

/// Response for `POST /v1/org/init`; the key is returned exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgInitResponse {
    pub org_id: String,
    pub api_key: String,
    pub key_prefix: String,
}

/// Body for `POST /v1/keys`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateKeyBody {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default)]
    pub is_root: bool,
}

/// Response for `POST /v1/keys`; the secret is returned exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateKeyResponse {
    pub id: String,
    pub key: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
}

/// One key in `GET /v1/keys` — never includes the secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyInfo {
    pub id: String,
    pub name: String,
    pub key_prefix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    pub is_root: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    pub revoked: bool,
}

/// Response for `GET /v1/keys`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyListResponse {
    pub keys: Vec<KeyInfo>,
}
