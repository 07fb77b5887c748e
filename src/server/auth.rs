//! Bearer-key authentication.
//!
//! Keys look like `lore_sk_` plus 32 hex characters and are stored as a
//! SHA-256 hash with a 12-character display prefix; the secret is shown
//! exactly once at creation. A small TTL cache keyed by hash keeps the
//! hot path off the database; revocation invalidates the entry eagerly.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;
use rand::RngCore;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::lesson::format_timestamp;

use super::error::ApiError;
use super::AppState;

/// How long a cached key lookup stays valid.
const CACHE_TTL: Duration = Duration::from_secs(60);

/// Display prefix length (`lore_sk_` plus four hex characters).
const PREFIX_LEN: usize = 12;

/// Resolved caller identity, injected into request extensions.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub key_id: String,
    pub org_id: String,
    /// `Some` for project-scoped keys: the caller sees only this project,
    /// and lessons outside it behave as absent.
    pub project: Option<String>,
    pub is_root: bool,
}

impl AuthContext {
    /// Root key or 403.
    pub fn require_root(&self) -> Result<(), ApiError> {
        if self.is_root {
            Ok(())
        } else {
            Err(ApiError::Forbidden("root key required".into()))
        }
    }
}

#[derive(Debug, Clone)]
struct KeyRecord {
    id: String,
    org_id: String,
    project: Option<String>,
    is_root: bool,
    revoked: bool,
}

/// TTL cache of key-hash lookups.
#[derive(Default)]
pub struct AuthCache {
    entries: Mutex<HashMap<String, (KeyRecord, Instant)>>,
}

impl AuthCache {
    fn get(&self, key_hash: &str) -> Option<KeyRecord> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(key_hash).and_then(|(record, cached_at)| {
            (cached_at.elapsed() < CACHE_TTL).then(|| record.clone())
        })
    }

    fn insert(&self, key_hash: String, record: KeyRecord) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key_hash, (record, Instant::now()));
    }

    /// Drop a cached entry; called on revocation so a revoked key stops
    /// working immediately.
    pub fn invalidate(&self, key_hash: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key_hash);
    }
}

/// A freshly generated API key: the raw secret plus what gets stored.
pub struct GeneratedKey {
    pub raw: String,
    pub hash: String,
    pub prefix: String,
}

/// Mint a new key: `lore_sk_` + 32 random hex characters.
pub fn generate_api_key() -> GeneratedKey {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    let raw = format!("lore_sk_{}", hex_encode(&bytes));
    GeneratedKey {
        hash: hash_key(&raw),
        prefix: raw[..PREFIX_LEN].to_string(),
        raw,
    }
}

/// SHA-256 hex digest of a raw key.
pub fn hash_key(raw: &str) -> String {
    hex_encode(&Sha256::digest(raw.as_bytes()))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Axum middleware: resolve the bearer key and stash an [`AuthContext`]
/// in request extensions. Runs on every route except `/health` and
/// `/v1/org/init`.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(&request)
        .ok_or_else(|| ApiError::Unauthorized("missing API key".into()))?;

    if !token.starts_with("lore_sk_") {
        return Err(ApiError::Unauthorized("invalid API key".into()));
    }

    let key_hash = hash_key(&token);
    let context = resolve_key(&state, key_hash).await?;

    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}

/// Pull the bearer token out of the Authorization header.
pub fn bearer_token(request: &Request) -> Option<String> {
    request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

async fn resolve_key(state: &Arc<AppState>, key_hash: String) -> Result<AuthContext, ApiError> {
    let record = match state.auth_cache.get(&key_hash) {
        Some(record) => record,
        None => {
            let looked_up = {
                let hash = key_hash.clone();
                state
                    .with_db(move |conn| Ok(lookup_key(conn, &hash)?))
                    .await?
            };
            let record =
                looked_up.ok_or_else(|| ApiError::Unauthorized("invalid API key".into()))?;
            state.auth_cache.insert(key_hash.clone(), record.clone());
            record
        }
    };

    if record.revoked {
        return Err(ApiError::Unauthorized("key revoked".into()));
    }

    // Best-effort last-used stamp; failures never block the request.
    let key_id = record.id.clone();
    let _ = state
        .with_db(move |conn| {
            conn.execute(
                "UPDATE api_keys SET last_used_at = ?1 WHERE id = ?2",
                params![format_timestamp(Utc::now()), key_id],
            )?;
            Ok(())
        })
        .await;

    Ok(AuthContext {
        key_id: record.id,
        org_id: record.org_id,
        project: record.project,
        is_root: record.is_root,
    })
}

fn lookup_key(conn: &Connection, key_hash: &str) -> rusqlite::Result<Option<KeyRecord>> {
    conn.query_row(
        "SELECT id, org_id, project, is_root, revoked_at FROM api_keys WHERE key_hash = ?1",
        params![key_hash],
        |row| {
            Ok(KeyRecord {
                id: row.get(0)?,
                org_id: row.get(1)?,
                project: row.get(2)?,
                is_root: row.get::<_, i64>(3)? != 0,
                revoked: row.get::<_, Option<String>>(4)?.is_some(),
            })
        },
    )
    .optional()
}
