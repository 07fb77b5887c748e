//! Per-key sliding-window rate limiter.
//!
//! Requests carrying a bearer token are counted against that token; over
//! the ceiling they are rejected with 429 and a `Retry-After` hint rather
//! than queued. Requests without a token (health checks, org init) pass
//! through untouched.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use super::auth::bearer_token;
use super::error::ApiError;
use super::AppState;

const WINDOW: Duration = Duration::from_secs(60);

/// In-memory sliding window, one timestamp queue per key.
pub struct RateLimiter {
    max_requests: u32,
    requests: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32) -> Self {
        Self {
            max_requests,
            requests: Mutex::new(HashMap::new()),
        }
    }

    /// Record one request for `key`. Returns `Ok(())` when allowed, or the
    /// seconds to wait when over the ceiling.
    pub fn check(&self, key: &str) -> Result<(), u64> {
        let now = Instant::now();
        let mut requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
        let timestamps = requests.entry(key.to_string()).or_default();

        while timestamps
            .front()
            .is_some_and(|&t| now.duration_since(t) >= WINDOW)
        {
            timestamps.pop_front();
        }

        if timestamps.len() >= self.max_requests as usize {
            // Seconds until the oldest request slides out of the window.
            let oldest = timestamps.front().copied().unwrap_or(now);
            let retry_after = WINDOW
                .saturating_sub(now.duration_since(oldest))
                .as_secs()
                .max(1);
            return Err(retry_after);
        }

        timestamps.push_back(now);
        Ok(())
    }

    /// Drop all recorded requests (tests).
    pub fn clear(&self) {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

/// Axum middleware applying the limiter to every keyed request.
pub async fn rate_limit(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(token) = bearer_token(&request) {
        if let Err(retry_after_secs) = state.rate_limiter.check(&token) {
            tracing::warn!(retry_after_secs, "rate limited request");
            return Err(ApiError::RateLimited { retry_after_secs });
        }
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_ceiling_then_rejects() {
        let limiter = RateLimiter::new(3);
        assert!(limiter.check("k").is_ok());
        assert!(limiter.check("k").is_ok());
        assert!(limiter.check("k").is_ok());

        let retry_after = limiter.check("k").unwrap_err();
        assert!(retry_after >= 1);
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::new(1);
        assert!(limiter.check("a").is_ok());
        assert!(limiter.check("b").is_ok());
        assert!(limiter.check("a").is_err());
    }

    #[test]
    fn clear_resets_state() {
        let limiter = RateLimiter::new(1);
        assert!(limiter.check("k").is_ok());
        assert!(limiter.check("k").is_err());
        limiter.clear();
        assert!(limiter.check("k").is_ok());
    }
}
