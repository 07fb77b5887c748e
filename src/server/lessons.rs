//! Lesson CRUD, search, export, and import handlers.
//!
//! Every query is scoped by the caller's org, and additionally by project
//! for project-scoped keys — a lesson outside that scope behaves as absent
//! (404, never 403).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Deserialize;
use uuid::Uuid;

use crate::embed::{self, EMBEDDING_DIM};
use crate::error::LoreError;
use crate::lesson::{check_confidence, format_timestamp, generate_id, parse_timestamp, Lesson};
use crate::score;
use crate::store::tags_match;
use crate::wire::{
    CreateLessonBody, CreateLessonResponse, ExportResponse, ImportBody, ImportResponse,
    LessonListResponse, SearchBody, SearchHit, SearchResponse, UpdateLessonBody, VoteField,
};

use super::auth::AuthContext;
use super::error::ApiError;
use super::AppState;

const LESSON_COLUMNS: &str = "id, problem, resolution, context, tags, confidence, source, \
     project, embedding, created_at, updated_at, expires_at, upvotes, downvotes, meta";

/// KNN over-fetch bounds: candidates are pulled from the vector index
/// before org/project/tag filters apply, so ask for well more than `limit`.
const KNN_MIN: usize = 100;
const KNN_MAX: usize = 1000;

fn read_lesson(row: &Row<'_>) -> Result<Lesson, ApiError> {
    let tags_raw: String = row.get(4)?;
    let blob: Option<Vec<u8>> = row.get(8)?;
    let created_raw: String = row.get(9)?;
    let updated_raw: String = row.get(10)?;
    let expires_raw: Option<String> = row.get(11)?;
    let meta_raw: Option<String> = row.get(14)?;

    let embedding = blob
        .as_deref()
        .map(embed::bytes_to_vector)
        .transpose()
        .map_err(ApiError::from)?;

    Ok(Lesson {
        id: row.get(0)?,
        problem: row.get(1)?,
        resolution: row.get(2)?,
        context: row.get(3)?,
        tags: serde_json::from_str(&tags_raw).map_err(ApiError::internal)?,
        confidence: row.get(5)?,
        source: row.get(6)?,
        project: row.get(7)?,
        embedding,
        created_at: parse_timestamp(&created_raw).map_err(ApiError::from)?,
        updated_at: parse_timestamp(&updated_raw).map_err(ApiError::from)?,
        expires_at: expires_raw
            .as_deref()
            .map(parse_timestamp)
            .transpose()
            .map_err(ApiError::from)?,
        upvotes: row.get(12)?,
        downvotes: row.get(13)?,
        meta: meta_raw.and_then(|s| serde_json::from_str(&s).ok()),
    })
}

/// Responses outside export never carry the vector.
fn strip_embedding(mut lesson: Lesson) -> Lesson {
    lesson.embedding = None;
    lesson
}

fn check_embedding_dim(vector: &[f32]) -> Result<(), ApiError> {
    if vector.len() != EMBEDDING_DIM {
        return Err(ApiError::Validation(format!(
            "embedding must have {EMBEDDING_DIM} dimensions, got {}",
            vector.len()
        )));
    }
    Ok(())
}

fn check_confidence_api(confidence: f64) -> Result<(), ApiError> {
    check_confidence(confidence).map_err(|e| match e {
        LoreError::Validation(msg) => ApiError::Validation(msg),
        other => ApiError::internal(other),
    })
}

/// Upsert the vector-index row for a lesson.
fn sync_vec_row(conn: &Connection, id: &str, embedding: Option<&[f32]>) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM lessons_vec WHERE id = ?1", params![id])?;
    if let Some(vector) = embedding {
        conn.execute(
            "INSERT INTO lessons_vec (id, embedding) VALUES (?1, ?2)",
            params![id, embed::vector_to_bytes(vector)],
        )?;
    }
    Ok(())
}

/// Write (or overwrite) a lesson row plus its vector-index entry.
fn upsert_lesson_row(conn: &Connection, org_id: &str, lesson: &Lesson) -> Result<(), ApiError> {
    conn.execute(
        "INSERT OR REPLACE INTO lessons \
         (id, org_id, problem, resolution, context, tags, confidence, source, project, \
          embedding, created_at, updated_at, expires_at, upvotes, downvotes, meta) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            lesson.id,
            org_id,
            lesson.problem,
            lesson.resolution,
            lesson.context,
            serde_json::to_string(&lesson.tags).map_err(ApiError::internal)?,
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
                .transpose()
                .map_err(ApiError::internal)?,
        ],
    )?;
    sync_vec_row(conn, &lesson.id, lesson.embedding.as_deref())?;
    Ok(())
}

// ── Create ────────────────────────────────────────────────────────────────────

/// `POST /v1/lessons`
pub async fn create_lesson(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<CreateLessonBody>,
) -> Result<(StatusCode, Json<CreateLessonResponse>), ApiError> {
    if body.problem.trim().is_empty() {
        return Err(ApiError::Validation("problem must not be empty".into()));
    }
    if body.resolution.trim().is_empty() {
        return Err(ApiError::Validation("resolution must not be empty".into()));
    }
    check_confidence_api(body.confidence)?;
    if let Some(vector) = &body.embedding {
        check_embedding_dim(vector)?;
    }

    let id = match body.id {
        Some(id) => {
            Uuid::parse_str(&id)
                .map_err(|_| ApiError::Validation(format!("malformed lesson id: {id}")))?;
            id
        }
        None => generate_id(),
    };

    // Project-scoped keys always write into their own project.
    let project = auth.project.clone().or(body.project);
    let now = Utc::now();
    let lesson = Lesson {
        id: id.clone(),
        problem: body.problem,
        resolution: body.resolution,
        context: body.context,
        tags: body.tags,
        confidence: body.confidence,
        source: body.source,
        project,
        embedding: body.embedding,
        created_at: now,
        updated_at: now,
        expires_at: body.expires_at,
        upvotes: 0,
        downvotes: 0,
        meta: body.meta,
    };

    state
        .with_db(move |conn| {
            let owner: Option<String> = conn
                .query_row(
                    "SELECT org_id FROM lessons WHERE id = ?1",
                    params![lesson.id],
                    |row| row.get(0),
                )
                .optional()?;
            if owner.as_deref().is_some_and(|org| org != auth.org_id) {
                return Err(ApiError::Conflict("lesson id already exists".into()));
            }

            let tx = conn.transaction()?;
            upsert_lesson_row(&tx, &auth.org_id, &lesson)?;
            tx.commit()?;
            Ok(())
        })
        .await?;

    Ok((StatusCode::CREATED, Json(CreateLessonResponse { id })))
}

// ── Read ──────────────────────────────────────────────────────────────────────

/// `GET /v1/lessons/{id}` — 404 for absent and out-of-scope alike.
pub async fn get_lesson(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(lesson_id): Path<String>,
) -> Result<Json<Lesson>, ApiError> {
    let lesson = state
        .with_db(move |conn| {
            let mut sql = format!(
                "SELECT {LESSON_COLUMNS} FROM lessons WHERE id = ?1 AND org_id = ?2"
            );
            let mut values: Vec<Box<dyn rusqlite::ToSql>> =
                vec![Box::new(lesson_id), Box::new(auth.org_id)];
            if let Some(project) = &auth.project {
                values.push(Box::new(project.clone()));
                sql.push_str(" AND project = ?3");
            }

            let mut stmt = conn.prepare(&sql)?;
            let mut rows =
                stmt.query(rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())))?;
            match rows.next()? {
                Some(row) => Ok(Some(read_lesson(row)?)),
                None => Ok(None),
            }
        })
        .await?
        .ok_or_else(|| ApiError::NotFound("lesson not found".into()))?;

    Ok(Json(strip_embedding(lesson)))
}

// ── Update ────────────────────────────────────────────────────────────────────

/// `PATCH /v1/lessons/{id}` — updates permitted fields; `"+1"` vote
/// sentinels become atomic SQL increments.
pub async fn update_lesson(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(lesson_id): Path<String>,
    Json(body): Json<UpdateLessonBody>,
) -> Result<Json<Lesson>, ApiError> {
    if body.is_empty() {
        return Err(ApiError::Validation("no fields to update".into()));
    }
    if let Some(confidence) = body.confidence {
        check_confidence_api(confidence)?;
    }
    for vote in [&body.upvotes, &body.downvotes].into_iter().flatten() {
        if let VoteField::Increment(sentinel) = vote {
            if sentinel != "+1" {
                return Err(ApiError::Validation(format!(
                    "vote sentinel must be \"+1\", got {sentinel:?}"
                )));
            }
        }
    }

    let lesson = state
        .with_db(move |conn| {
            let mut set_parts: Vec<String> = Vec::new();
            let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

            if let Some(confidence) = body.confidence {
                values.push(Box::new(confidence));
                set_parts.push(format!("confidence = ?{}", values.len()));
            }
            if let Some(tags) = &body.tags {
                values.push(Box::new(
                    serde_json::to_string(tags).map_err(ApiError::internal)?,
                ));
                set_parts.push(format!("tags = ?{}", values.len()));
            }
            if let Some(meta) = &body.meta {
                values.push(Box::new(
                    serde_json::to_string(meta).map_err(ApiError::internal)?,
                ));
                set_parts.push(format!("meta = ?{}", values.len()));
            }
            for (column, vote) in [("upvotes", &body.upvotes), ("downvotes", &body.downvotes)] {
                match vote {
                    Some(VoteField::Increment(_)) => {
                        set_parts.push(format!("{column} = {column} + 1"));
                    }
                    Some(VoteField::Set(value)) => {
                        values.push(Box::new(*value as i64));
                        set_parts.push(format!("{column} = ?{}", values.len()));
                    }
                    None => {}
                }
            }

            values.push(Box::new(format_timestamp(Utc::now())));
            set_parts.push(format!("updated_at = ?{}", values.len()));

            values.push(Box::new(lesson_id.clone()));
            let id_idx = values.len();
            values.push(Box::new(auth.org_id.clone()));
            let org_idx = values.len();
            let mut where_sql = format!("id = ?{id_idx} AND org_id = ?{org_idx}");
            if let Some(project) = &auth.project {
                values.push(Box::new(project.clone()));
                where_sql.push_str(&format!(" AND project = ?{}", values.len()));
            }

            let sql = format!(
                "UPDATE lessons SET {} WHERE {}",
                set_parts.join(", "),
                where_sql
            );
            let changed = conn.execute(
                &sql,
                rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())),
            )?;
            if changed == 0 {
                return Err(ApiError::NotFound("lesson not found".into()));
            }

            let mut stmt = conn.prepare(&format!(
                "SELECT {LESSON_COLUMNS} FROM lessons WHERE id = ?1"
            ))?;
            let mut rows = stmt.query(params![lesson_id])?;
            match rows.next()? {
                Some(row) => read_lesson(row),
                None => Err(ApiError::NotFound("lesson not found".into())),
            }
        })
        .await?;

    Ok(Json(strip_embedding(lesson)))
}

// ── Delete ────────────────────────────────────────────────────────────────────

/// `DELETE /v1/lessons/{id}` — 204 on success, 404 otherwise.
pub async fn delete_lesson(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(lesson_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .with_db(move |conn| {
            let mut sql = "DELETE FROM lessons WHERE id = ?1 AND org_id = ?2".to_string();
            let mut values: Vec<Box<dyn rusqlite::ToSql>> =
                vec![Box::new(lesson_id.clone()), Box::new(auth.org_id)];
            if let Some(project) = &auth.project {
                values.push(Box::new(project.clone()));
                sql.push_str(" AND project = ?3");
            }

            let changed = conn.execute(
                &sql,
                rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())),
            )?;
            if changed == 0 {
                return Err(ApiError::NotFound("lesson not found".into()));
            }
            conn.execute("DELETE FROM lessons_vec WHERE id = ?1", params![lesson_id])?;
            Ok(())
        })
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

// ── List ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub project: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// `GET /v1/lessons?project=&limit=&offset=` — newest first, max limit 200.
pub async fn list_lessons(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListQuery>,
) -> Result<Json<LessonListResponse>, ApiError> {
    let limit = query.limit.unwrap_or(50);
    if limit == 0 || limit > 200 {
        return Err(ApiError::Validation(
            "limit must be between 1 and 200".into(),
        ));
    }
    let offset = query.offset.unwrap_or(0);

    let response = state
        .with_db(move |conn| {
            let mut where_sql = "org_id = ?1".to_string();
            let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(auth.org_id)];

            // Key scope wins over the query parameter.
            let project = auth.project.as_ref().or(query.project.as_ref());
            if let Some(project) = project {
                values.push(Box::new(project.clone()));
                where_sql.push_str(&format!(" AND project = ?{}", values.len()));
            }

            let total: u64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM lessons WHERE {where_sql}"),
                rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())),
                |row| row.get::<_, i64>(0).map(|n| n as u64),
            )?;

            values.push(Box::new(limit as i64));
            let limit_idx = values.len();
            values.push(Box::new(offset as i64));
            let offset_idx = values.len();

            let mut stmt = conn.prepare(&format!(
                "SELECT {LESSON_COLUMNS} FROM lessons WHERE {where_sql} \
                 ORDER BY created_at DESC, id DESC LIMIT ?{limit_idx} OFFSET ?{offset_idx}"
            ))?;
            let mut rows =
                stmt.query(rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())))?;
            let mut lessons = Vec::new();
            while let Some(row) = rows.next()? {
                lessons.push(strip_embedding(read_lesson(row)?));
            }

            Ok(LessonListResponse {
                lessons,
                total,
                limit,
                offset,
            })
        })
        .await?;

    Ok(Json(response))
}

// ── Search ────────────────────────────────────────────────────────────────────

/// `POST /v1/lessons/search` — KNN candidates from the vector index, then
/// filter and the decay/vote scoring shared with the client.
pub async fn search_lessons(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<SearchBody>,
) -> Result<Json<SearchResponse>, ApiError> {
    check_embedding_dim(&body.embedding)?;
    if body.limit == 0 || body.limit > 50 {
        return Err(ApiError::Validation("limit must be between 1 and 50".into()));
    }
    check_confidence_api(body.min_confidence)?;

    let limit = body.limit as usize;
    let hits = state
        .with_db(move |conn| {
            let k = (limit * 20).clamp(KNN_MIN, KNN_MAX);
            let query_blob = embed::vector_to_bytes(&body.embedding);

            let mut stmt = conn.prepare(
                "SELECT id, distance FROM lessons_vec \
                 WHERE embedding MATCH ?1 ORDER BY distance LIMIT ?2",
            )?;
            let candidates: Vec<(String, f64)> = stmt
                .query_map(params![query_blob, k as i64], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            if candidates.is_empty() {
                return Ok(Vec::new());
            }

            // Hydrate candidate rows within the caller's scope.
            let placeholders: Vec<String> =
                (1..=candidates.len()).map(|i| format!("?{i}")).collect();
            let mut sql = format!(
                "SELECT {LESSON_COLUMNS} FROM lessons WHERE id IN ({}) AND org_id = ?{}",
                placeholders.join(", "),
                candidates.len() + 1
            );
            let mut values: Vec<Box<dyn rusqlite::ToSql>> = candidates
                .iter()
                .map(|(id, _)| Box::new(id.clone()) as Box<dyn rusqlite::ToSql>)
                .collect();
            values.push(Box::new(auth.org_id));

            let project = auth.project.as_ref().or(body.project.as_ref());
            if let Some(project) = project {
                values.push(Box::new(project.clone()));
                sql.push_str(&format!(" AND project = ?{}", values.len()));
            }

            let mut stmt = conn.prepare(&sql)?;
            let mut rows =
                stmt.query(rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())))?;
            let mut by_id = std::collections::HashMap::new();
            while let Some(row) = rows.next()? {
                let lesson = read_lesson(row)?;
                by_id.insert(lesson.id.clone(), lesson);
            }

            let wanted_tags = body.tags.clone().unwrap_or_default();
            let now = Utc::now();
            let mut hits: Vec<SearchHit> = Vec::new();
            for (id, distance) in candidates {
                let Some(lesson) = by_id.remove(&id) else {
                    continue;
                };
                if lesson.is_expired(now)
                    || !tags_match(&lesson.tags, &wanted_tags)
                    || lesson.confidence < body.min_confidence
                {
                    continue;
                }
                hits.push(SearchHit {
                    score: server_score(&lesson, distance, now),
                    lesson: strip_embedding(lesson),
                });
            }

            hits.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.lesson.created_at.cmp(&a.lesson.created_at))
                    .then_with(|| b.lesson.id.cmp(&a.lesson.id))
            });
            hits.truncate(limit);
            Ok(hits)
        })
        .await?;

    Ok(Json(SearchResponse { lessons: hits }))
}

/// `(1 - cosine_distance) * confidence * exp(-λ·age) * vote_factor`,
/// aged from `updated_at`.
fn server_score(lesson: &Lesson, distance: f64, now: DateTime<Utc>) -> f64 {
    let cosine_sim = 1.0 - distance;
    let age_days = ((now - lesson.updated_at).num_milliseconds() as f64 / 86_400_000.0).max(0.0);
    cosine_sim
        * lesson.confidence
        * score::exponential_decay(age_days, score::SERVER_DECAY_LAMBDA)
        * score::vote_factor(lesson.upvotes, lesson.downvotes)
}

// ── Export / Import ───────────────────────────────────────────────────────────

/// `POST /v1/lessons/export` — every accessible lesson, embeddings
/// included.
pub async fn export_lessons(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<ExportResponse>, ApiError> {
    let lessons = state
        .with_db(move |conn| {
            let mut sql = format!("SELECT {LESSON_COLUMNS} FROM lessons WHERE org_id = ?1");
            let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(auth.org_id)];
            if let Some(project) = &auth.project {
                values.push(Box::new(project.clone()));
                sql.push_str(" AND project = ?2");
            }
            sql.push_str(" ORDER BY created_at");

            let mut stmt = conn.prepare(&sql)?;
            let mut rows =
                stmt.query(rusqlite::params_from_iter(values.iter().map(|v| v.as_ref())))?;
            let mut lessons = Vec::new();
            while let Some(row) = rows.next()? {
                lessons.push(read_lesson(row)?);
            }
            Ok(lessons)
        })
        .await?;

    Ok(Json(ExportResponse { lessons }))
}

/// `POST /v1/lessons/import` — upsert by id within the caller's scope.
pub async fn import_lessons(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<ImportBody>,
) -> Result<Json<ImportResponse>, ApiError> {
    for record in &body.lessons {
        if record.problem.trim().is_empty() || record.resolution.trim().is_empty() {
            return Err(ApiError::Validation(
                "problem and resolution must not be empty".into(),
            ));
        }
        check_confidence_api(record.confidence)?;
        if let Some(vector) = &record.embedding {
            check_embedding_dim(vector)?;
        }
    }

    let imported = state
        .with_db(move |conn| {
            let tx = conn.transaction()?;
            let mut imported = 0u64;
            for mut record in body.lessons {
                // Never upsert across org boundaries.
                let owner: Option<String> = tx
                    .query_row(
                        "SELECT org_id FROM lessons WHERE id = ?1",
                        params![record.id],
                        |row| row.get(0),
                    )
                    .optional()?;
                if owner.as_deref().is_some_and(|org| org != auth.org_id) {
                    continue;
                }

                if let Some(project) = &auth.project {
                    record.project = Some(project.clone());
                }
                upsert_lesson_row(&tx, &auth.org_id, &record)?;
                imported += 1;
            }
            tx.commit()?;
            Ok(imported)
        })
        .await?;

    Ok(Json(ImportResponse { imported }))
}
