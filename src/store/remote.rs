//! HTTP-backed store that delegates every operation to the lesson server.
//!
//! Each capability operation is exactly one HTTP call. 401/403 surface as
//! authentication failures, 429 as rate-limit failures with the server's
//! retry hint, and any transport-level error as a connection failure whose
//! outcome (for mutating calls) must be assumed indeterminate — nothing is
//! retried at this layer.

use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;

use crate::error::{LoreError, Result};
use crate::lesson::Lesson;
use crate::wire::{
    CreateLessonBody, CreateLessonResponse, ErrorBody, ExportResponse, ImportBody,
    ImportResponse, LessonListResponse, SearchBody, SearchResponse, UpdateLessonBody, VoteField,
};

use super::{ListOptions, ScoredLesson, SearchOptions, Store, Vote};

/// Default per-call deadline.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Client of the tenant-scoped lesson server.
///
/// Cheap to share: the inner [`Client`] pools connections, and the only
/// other state is the immutable base URL and key.
pub struct RemoteStore {
    client: Client,
    base_url: String,
}

impl RemoteStore {
    /// Connect to `api_url` authenticating with `api_key`.
    pub fn new(api_url: &str, api_key: &str) -> Result<Self> {
        Self::with_timeout(api_url, api_key, DEFAULT_TIMEOUT)
    }

    /// Connect with a custom per-call deadline.
    pub fn with_timeout(api_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        let mut auth = reqwest::header::HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| LoreError::invalid("api key contains invalid header characters"))?;
        auth.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, auth);

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| LoreError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            base_url: api_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Send a request, mapping transport failures and non-2xx statuses to
    /// the error taxonomy. 404 is returned to the caller, which knows the
    /// operation's absent semantics.
    fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().map_err(|e| {
            if e.is_timeout() {
                LoreError::Connection(format!("request timed out: {e}"))
            } else {
                LoreError::Connection(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let message = response
            .json::<ErrorBody>()
            .map(|body| body.message)
            .unwrap_or_else(|_| status.to_string());

        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LoreError::Auth(message),
            StatusCode::TOO_MANY_REQUESTS => LoreError::RateLimited {
                retry_after_secs: retry_after.unwrap_or(1),
            },
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                LoreError::Validation(message)
            }
            _ => LoreError::Remote(format!("{status}: {message}")),
        })
    }

    fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T> {
        response
            .json::<T>()
            .map_err(|e| LoreError::Remote(format!("bad response body: {e}")))
    }

    /// Bulk export via `POST /v1/lessons/export`, embeddings included.
    pub fn export_bulk(&self) -> Result<Vec<Lesson>> {
        let response = self.send(self.client.post(self.url("/v1/lessons/export")))?;
        Ok(Self::decode::<ExportResponse>(response)?.lessons)
    }

    /// Bulk upsert via `POST /v1/lessons/import`. Returns the count the
    /// server applied.
    pub fn import_bulk(&self, lessons: &[Lesson]) -> Result<u64> {
        let body = ImportBody {
            lessons: lessons.to_vec(),
        };
        let response = self.send(self.client.post(self.url("/v1/lessons/import")).json(&body))?;
        Ok(Self::decode::<ImportResponse>(response)?.imported)
    }

    fn patch(&self, id: &str, body: &UpdateLessonBody) -> Result<bool> {
        let response = self.send(
            self.client
                .patch(self.url(&format!("/v1/lessons/{id}")))
                .json(body),
        )?;
        Ok(response.status() != StatusCode::NOT_FOUND)
    }
}

impl Store for RemoteStore {
    fn save(&self, lesson: &Lesson) -> Result<()> {
        let body = CreateLessonBody {
            id: Some(lesson.id.clone()),
            problem: lesson.problem.clone(),
            resolution: lesson.resolution.clone(),
            context: lesson.context.clone(),
            tags: lesson.tags.clone(),
            confidence: lesson.confidence,
            source: lesson.source.clone(),
            project: lesson.project.clone(),
            embedding: lesson.embedding.clone(),
            expires_at: lesson.expires_at,
            meta: lesson.meta.clone(),
        };
        let response = self.send(self.client.post(self.url("/v1/lessons")).json(&body))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(LoreError::Remote("publish endpoint missing".into()));
        }
        let _ack: CreateLessonResponse = Self::decode(response)?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Lesson>> {
        let response = self.send(self.client.get(self.url(&format!("/v1/lessons/{id}"))))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(Self::decode(response)?))
    }

    fn list(&self, options: &ListOptions) -> Result<Vec<Lesson>> {
        let mut request = self.client.get(self.url("/v1/lessons"));
        if let Some(project) = &options.project {
            request = request.query(&[("project", project.as_str())]);
        }
        if let Some(limit) = options.limit {
            request = request.query(&[("limit", limit.to_string())]);
        }
        let response = self.send(request)?;
        Ok(Self::decode::<LessonListResponse>(response)?.lessons)
    }

    fn update(&self, lesson: &Lesson) -> Result<bool> {
        self.patch(
            &lesson.id,
            &UpdateLessonBody {
                confidence: Some(lesson.confidence),
                tags: Some(lesson.tags.clone()),
                upvotes: Some(VoteField::Set(lesson.upvotes)),
                downvotes: Some(VoteField::Set(lesson.downvotes)),
                meta: lesson.meta.clone(),
            },
        )
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let response = self.send(self.client.delete(self.url(&format!("/v1/lessons/{id}"))))?;
        Ok(response.status() != StatusCode::NOT_FOUND)
    }

    fn search(&self, embedding: &[f32], options: &SearchOptions) -> Result<Vec<ScoredLesson>> {
        let body = SearchBody {
            embedding: embedding.to_vec(),
            tags: if options.tags.is_empty() {
                None
            } else {
                Some(options.tags.clone())
            },
            project: options.project.clone(),
            limit: options.limit as u32,
            min_confidence: options.min_confidence,
        };
        let response = self.send(self.client.post(self.url("/v1/lessons/search")).json(&body))?;
        let hits = Self::decode::<SearchResponse>(response)?;
        Ok(hits
            .lessons
            .into_iter()
            .map(|hit| ScoredLesson {
                lesson: hit.lesson,
                score: hit.score,
            })
            .collect())
    }

    fn increment_vote(&self, id: &str, vote: Vote) -> Result<bool> {
        // The "+1" sentinel becomes a single atomic SQL increment server-side.
        let body = match vote {
            Vote::Up => UpdateLessonBody {
                upvotes: Some(VoteField::increment()),
                ..Default::default()
            },
            Vote::Down => UpdateLessonBody {
                downvotes: Some(VoteField::increment()),
                ..Default::default()
            },
        };
        self.patch(id, &body)
    }

    fn export(&self) -> Result<Vec<Lesson>> {
        self.export_bulk()
    }
}
