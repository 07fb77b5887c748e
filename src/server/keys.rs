//! Org bootstrap and API key management handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::lesson::{format_timestamp, generate_id, parse_timestamp};
use crate::wire::{
    CreateKeyBody, CreateKeyResponse, KeyInfo, KeyListResponse, OrgInitBody, OrgInitResponse,
};

use super::auth::{generate_api_key, AuthContext};
use super::error::ApiError;
use super::AppState;

/// `POST /v1/org/init` — one-shot creation of the org and its root key.
///
/// The raw key is returned once and never stored. 409 when an org already
/// exists in this deployment.
pub async fn org_init(
    State(state): State<Arc<AppState>>,
    Json(body): Json<OrgInitBody>,
) -> Result<(StatusCode, Json<OrgInitResponse>), ApiError> {
    if body.name.trim().is_empty() {
        return Err(ApiError::Validation("org name must not be empty".into()));
    }

    let key = generate_api_key();
    let org_id = generate_id();
    let key_id = generate_id();
    let prefix = key.prefix.clone();
    let raw = key.raw.clone();

    let org_id_out = org_id.clone();
    state
        .with_db(move |conn| {
            let tx = conn.transaction()?;

            let existing: Option<String> = tx
                .query_row("SELECT id FROM orgs LIMIT 1", [], |row| row.get(0))
                .optional()?;
            if existing.is_some() {
                return Err(ApiError::Conflict("org already exists".into()));
            }

            let now = format_timestamp(Utc::now());
            tx.execute(
                "INSERT INTO orgs (id, name, created_at) VALUES (?1, ?2, ?3)",
                params![org_id, body.name, now],
            )?;
            tx.execute(
                "INSERT INTO api_keys (id, org_id, name, key_hash, key_prefix, is_root, created_at) \
                 VALUES (?1, ?2, 'root', ?3, ?4, 1, ?5)",
                params![key_id, org_id, key.hash, key.prefix, now],
            )?;

            tx.commit()?;
            Ok(())
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(OrgInitResponse {
            org_id: org_id_out,
            api_key: raw,
            key_prefix: prefix,
        }),
    ))
}

/// `POST /v1/keys` — create an API key. Root only; the secret appears in
/// this response and nowhere else.
pub async fn create_key(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<CreateKeyBody>,
) -> Result<(StatusCode, Json<CreateKeyResponse>), ApiError> {
    auth.require_root()?;
    if body.name.trim().is_empty() {
        return Err(ApiError::Validation("key name must not be empty".into()));
    }

    let key = generate_api_key();
    let key_id = generate_id();
    let raw = key.raw.clone();

    let response = CreateKeyResponse {
        id: key_id.clone(),
        key: raw,
        name: body.name.clone(),
        project: body.project.clone(),
    };

    state
        .with_db(move |conn| {
            conn.execute(
                "INSERT INTO api_keys (id, org_id, name, key_hash, key_prefix, project, is_root, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    key_id,
                    auth.org_id,
                    body.name,
                    key.hash,
                    key.prefix,
                    body.project,
                    body.is_root as i64,
                    format_timestamp(Utc::now()),
                ],
            )?;
            Ok(())
        })
        .await?;

    Ok((StatusCode::CREATED, Json(response)))
}

/// `GET /v1/keys` — list the org's keys without secrets. Root only.
pub async fn list_keys(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<KeyListResponse>, ApiError> {
    auth.require_root()?;

    let keys = state
        .with_db(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, key_prefix, project, is_root, created_at, last_used_at, revoked_at \
                 FROM api_keys WHERE org_id = ?1 ORDER BY created_at",
            )?;
            let mut rows = stmt.query(params![auth.org_id])?;
            let mut keys = Vec::new();
            while let Some(row) = rows.next()? {
                let created_raw: String = row.get(5)?;
                let last_used_raw: Option<String> = row.get(6)?;
                let revoked_raw: Option<String> = row.get(7)?;
                keys.push(KeyInfo {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    key_prefix: row.get(2)?,
                    project: row.get(3)?,
                    is_root: row.get::<_, i64>(4)? != 0,
                    created_at: parse_timestamp(&created_raw)?,
                    last_used_at: last_used_raw
                        .as_deref()
                        .map(parse_timestamp)
                        .transpose()?,
                    revoked: revoked_raw.is_some(),
                });
            }
            Ok(keys)
        })
        .await?;

    Ok(Json(KeyListResponse { keys }))
}

/// `DELETE /v1/keys/{id}` — revoke by setting `revoked_at`. Root only, and
/// the last active root key cannot be revoked.
pub async fn revoke_key(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(key_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    auth.require_root()?;

    let revoked_hash = state
        .with_db(move |conn| {
            let tx = conn.transaction()?;

            let target: Option<(bool, String, Option<String>)> = tx
                .query_row(
                    "SELECT is_root, key_hash, revoked_at FROM api_keys \
                     WHERE id = ?1 AND org_id = ?2",
                    params![key_id, auth.org_id],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)? != 0,
                            row.get(1)?,
                            row.get(2)?,
                        ))
                    },
                )
                .optional()?;

            let Some((is_root, key_hash, revoked_at)) = target else {
                return Err(ApiError::NotFound("key not found".into()));
            };
            if revoked_at.is_some() {
                return Err(ApiError::BadRequest("key already revoked".into()));
            }

            if is_root {
                let active_roots: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM api_keys \
                     WHERE org_id = ?1 AND is_root = 1 AND revoked_at IS NULL",
                    params![auth.org_id],
                    |row| row.get(0),
                )?;
                if active_roots <= 1 {
                    return Err(ApiError::BadRequest(
                        "cannot revoke the last root key".into(),
                    ));
                }
            }

            tx.execute(
                "UPDATE api_keys SET revoked_at = ?1 WHERE id = ?2",
                params![format_timestamp(Utc::now()), key_id],
            )?;
            tx.commit()?;
            Ok(key_hash)
        })
        .await?;

    // A revoked key must stop working before the cache TTL runs out.
    state.auth_cache.invalidate(&revoked_hash);

    Ok(StatusCode::NO_CONTENT)
}
