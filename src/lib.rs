//! Cross-agent lesson memory — publish operational lessons, retrieve the
//! most relevant ones, inject them into prompts.
//!
//! Agents record short problem/resolution pairs ("lessons"); later queries
//! rank them by embedding similarity weighted by confidence, age, and
//! votes. Every text field passes a redaction pipeline before storage, so
//! API keys, credit cards, emails, phone numbers, and IP addresses never
//! reach disk.
//!
//! # Architecture
//!
//! - **Storage**: a [`store::Store`] capability set with three client-side
//!   backends — in-memory, embedded SQLite (vectors as little-endian f32
//!   blobs), and an HTTP client of the tenant-scoped server in [`server`]
//!   (which ranks on a [sqlite-vec](https://github.com/asg017/sqlite-vec)
//!   index)
//! - **Embeddings**: pluggable via [`embed::Embedder`], fixed at 384
//!   dimensions; the crate never generates vectors itself
//! - **Ranking**: cosine similarity × confidence × time decay × vote
//!   factor ([`score`])
//!
//! # Modules
//!
//! - [`config`] — configuration loading from TOML files and environment
//!   variables
//! - [`redact`] — the layered scrubber run before any storage
//! - [`lesson`] — the lesson record and monotonic id generation
//! - [`store`] — storage backends behind one capability set
//! - [`server`] — the multi-tenant HTTP server (orgs, keys, rate limits)

pub mod config;
pub mod embed;
pub mod error;
pub mod lesson;
pub mod lore;
pub mod redact;
pub mod score;
pub mod server;
pub mod store;
pub mod wire;

pub use error::{LoreError, Result};
pub use lesson::{Lesson, LessonDraft};
pub use lore::{Lore, LoreBuilder, QueryOptions, QueryResult};
