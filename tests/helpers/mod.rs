#![allow(dead_code)]

use std::sync::Arc;

use lore::embed::{Embedder, FnEmbedder, EMBEDDING_DIM};
use lore::server::{self, AppState};
use lore::wire::OrgInitResponse;

/// Deterministic bag-of-words embedding: each lowercased token bumps one
/// dimension (FNV hash), then the vector is L2-normalized. Texts sharing
/// words get positive cosine similarity, which is all retrieval tests
/// need.
pub fn embed_keywords(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    for word in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in word.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        v[(hash % EMBEDDING_DIM as u64) as usize] += 1.0;
    }

    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// The keyword embedder as a shareable trait object.
pub fn keyword_embedder() -> Arc<dyn Embedder> {
    Arc::new(FnEmbedder(embed_keywords))
}

/// Unit vector along dimension `i` — orthogonal to any other axis.
pub fn axis_embedding(i: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    v[i % EMBEDDING_DIM] = 1.0;
    v
}

/// A lesson server over a fresh in-memory database, running on its own
/// thread, with its org already initialized.
pub struct TestServer {
    pub base_url: String,
    pub org_id: String,
    pub root_key: String,
}

/// Start a server on an ephemeral port. The thread is detached; it dies
/// with the test process.
pub fn spawn_server(rate_limit_per_minute: u32) -> TestServer {
    let conn = server::db::open_memory_database().unwrap();
    let state = AppState::new(conn, rate_limit_per_minute);
    let app = server::router(state);

    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async move {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            tx.send(listener.local_addr().unwrap()).unwrap();
            axum::serve(listener, app).await.unwrap();
        });
    });

    let addr = rx.recv().unwrap();
    let base_url = format!("http://{addr}");

    let init: OrgInitResponse = reqwest::blocking::Client::new()
        .post(format!("{base_url}/v1/org/init"))
        .json(&serde_json::json!({"name": "test-org"}))
        .send()
        .unwrap()
        .json()
        .unwrap();

    TestServer {
        base_url,
        org_id: init.org_id,
        root_key: init.api_key,
    }
}

impl TestServer {
    /// Create an API key through the management endpoint.
    pub fn create_key(&self, name: &str, project: Option<&str>) -> String {
        let response: lore::wire::CreateKeyResponse = reqwest::blocking::Client::new()
            .post(format!("{}/v1/keys", self.base_url))
            .bearer_auth(&self.root_key)
            .json(&serde_json::json!({"name": name, "project": project}))
            .send()
            .unwrap()
            .json()
            .unwrap();
        response.key
    }
}
