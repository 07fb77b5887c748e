//! The lesson server: an axum application over the server database.
//!
//! All state lives in the database; the process keeps only the auth cache
//! and the rate limiter's bookkeeping. Handlers run their database work on
//! the blocking pool via [`AppState::with_db`].

pub mod auth;
pub mod db;
pub mod error;
pub mod keys;
pub mod lessons;
pub mod rate_limit;

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use axum::routing::{delete, get, post};
use axum::{middleware, Json, Router};
use rusqlite::Connection;

use crate::config::LoreConfig;

use auth::AuthCache;
use error::ApiError;
use rate_limit::RateLimiter;

/// Shared application state.
pub struct AppState {
    db: Arc<Mutex<Connection>>,
    pub auth_cache: AuthCache,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    pub fn new(conn: Connection, rate_limit_per_minute: u32) -> Arc<Self> {
        Arc::new(Self {
            db: Arc::new(Mutex::new(conn)),
            auth_cache: AuthCache::default(),
            rate_limiter: RateLimiter::new(rate_limit_per_minute),
        })
    }

    /// Run `f` against the database on the blocking pool.
    pub(crate) async fn with_db<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&mut Connection) -> Result<T, ApiError> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let mut conn = db.lock().unwrap_or_else(|e| e.into_inner());
            f(&mut conn)
        })
        .await
        .map_err(ApiError::internal)?
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Build the full router: `/health` and `/v1/org/init` are public, the
/// rest requires a bearer key; every keyed request passes the rate
/// limiter first.
pub fn router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route(
            "/v1/lessons",
            post(lessons::create_lesson).get(lessons::list_lessons),
        )
        .route("/v1/lessons/search", post(lessons::search_lessons))
        .route("/v1/lessons/export", post(lessons::export_lessons))
        .route("/v1/lessons/import", post(lessons::import_lessons))
        .route(
            "/v1/lessons/{id}",
            get(lessons::get_lesson)
                .patch(lessons::update_lesson)
                .delete(lessons::delete_lesson),
        )
        .route("/v1/keys", post(keys::create_key).get(keys::list_keys))
        .route("/v1/keys/{id}", delete(keys::revoke_key))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::require_auth,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/v1/org/init", post(keys::org_init))
        .merge(protected)
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            rate_limit::rate_limit,
        ))
        .with_state(state)
}

/// Build state from a database path.
pub fn build_state(db_path: impl AsRef<Path>, rate_limit_per_minute: u32) -> Result<Arc<AppState>> {
    let conn = db::open_database(db_path)?;
    Ok(AppState::new(conn, rate_limit_per_minute))
}

/// Start the server per config and run until ctrl-c.
pub async fn serve(config: &LoreConfig) -> Result<()> {
    let db_path = config
        .server
        .database
        .as_deref()
        .context("server.database (or LORE_DATABASE) must be set to run the server")?;

    let state = build_state(db_path, config.server.rate_limit_per_minute)?;
    let app = router(state);

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    tracing::info!(addr = %bind_addr, "lesson server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to listen for ctrl-c");
            tracing::info!("shutting down");
        })
        .await?;

    Ok(())
}
