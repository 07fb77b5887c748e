mod helpers;

use chrono::{Duration, Utc};
use helpers::keyword_embedder;
use lore::store::memory::MemoryStore;
use lore::store::sqlite::SqliteStore;
use lore::{LessonDraft, Lore, QueryOptions};

fn memory_lore() -> Lore {
    Lore::builder()
        .store(Box::new(MemoryStore::new()))
        .embedder(keyword_embedder())
        .build()
        .unwrap()
}

#[test]
fn rate_limit_lesson_ranks_first() {
    let lore = memory_lore();
    let id = lore
        .publish(LessonDraft {
            problem: "Stripe API returns 429 after 100 req/min".into(),
            resolution: "Exponential backoff starting at 1s, cap at 32s".into(),
            tags: vec!["stripe".into(), "rate-limit".into()],
            confidence: Some(0.9),
            ..Default::default()
        })
        .unwrap();
    lore.publish(LessonDraft {
        problem: "Postgres connection pool exhausted".into(),
        resolution: "Raise max_connections and add pgbouncer".into(),
        tags: vec!["postgres".into()],
        confidence: Some(0.9),
        ..Default::default()
    })
    .unwrap();

    let results = lore
        .query("stripe rate limiting", &QueryOptions::default())
        .unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].lesson.id, id);
    assert!(results[0].score > 0.0);
}

#[test]
fn pii_is_redacted_on_publish() {
    let dir = tempfile::tempdir().unwrap();
    let lore = Lore::builder()
        .store(Box::new(
            SqliteStore::open(dir.path().join("lessons.db")).unwrap(),
        ))
        .embedder(keyword_embedder())
        .build()
        .unwrap();

    let id = lore
        .publish(LessonDraft {
            problem: "Auth failed with key sk-abc123def456ghi789jkl012mno".into(),
            resolution: "rotate the key".into(),
            ..Default::default()
        })
        .unwrap();

    let lesson = lore.get(&id).unwrap().unwrap();
    assert_eq!(lesson.problem, "Auth failed with key [REDACTED:api_key]");
    lore.close().unwrap();
}

#[test]
fn custom_redaction_pattern_applies() {
    let lore = Lore::builder()
        .store(Box::new(MemoryStore::new()))
        .embedder(keyword_embedder())
        .redact_patterns(vec![(r"ACCT-\d{8}".into(), "account_id".into())])
        .build()
        .unwrap();

    let id = lore
        .publish(LessonDraft {
            problem: "account ACCT-12345678 has error".into(),
            resolution: "reprovision it".into(),
            ..Default::default()
        })
        .unwrap();

    let lesson = lore.get(&id).unwrap().unwrap();
    assert!(lesson.problem.contains("[REDACTED:account_id]"));
    assert!(!lesson.problem.contains("12345678"));
}

#[test]
fn upvoted_lesson_outranks_identical_twin() {
    let lore = memory_lore();
    let draft = LessonDraft {
        problem: "deploy pipeline flaky on fridays".into(),
        resolution: "pin runner image digest".into(),
        confidence: Some(0.5),
        ..Default::default()
    };
    let favored = lore.publish(draft.clone()).unwrap();
    let other = lore.publish(draft).unwrap();

    for _ in 0..5 {
        lore.upvote(&favored).unwrap();
    }

    let results = lore
        .query("flaky deploy pipeline", &QueryOptions::default())
        .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].lesson.id, favored);
    assert_eq!(results[1].lesson.id, other);
    // vote factor 1.5 vs 1.0
    assert!(results[0].score >= 1.5 * results[1].score - 1e-9);
}

#[test]
fn expired_lessons_never_surface() {
    let lore = memory_lore();
    lore.publish(LessonDraft {
        problem: "cache poisoned by stale deploy".into(),
        resolution: "bust the cache on release".into(),
        expires_at: Some(Utc::now() - Duration::minutes(1)),
        ..Default::default()
    })
    .unwrap();

    let results = lore
        .query("stale cache deploy", &QueryOptions::default())
        .unwrap();
    assert!(results.is_empty());
}

#[test]
fn scores_are_monotonically_non_increasing() {
    let lore = memory_lore();
    for (problem, resolution) in [
        ("kafka consumer lag grows", "scale the consumer group"),
        ("kafka broker disk full", "tune retention hours"),
        ("redis eviction storms", "raise maxmemory"),
        ("nginx 502 under load", "bump worker_connections"),
    ] {
        lore.publish(LessonDraft {
            problem: problem.into(),
            resolution: resolution.into(),
            ..Default::default()
        })
        .unwrap();
    }

    let results = lore
        .query("kafka disk and consumer problems", &QueryOptions { limit: 10, ..Default::default() })
        .unwrap();
    assert!(results.len() >= 2);
    for pair in results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[test]
fn tag_filter_is_subset_semantics() {
    let lore = memory_lore();
    lore.publish(LessonDraft {
        problem: "stripe webhook retries out of order".into(),
        resolution: "make the handler idempotent".into(),
        tags: vec!["stripe".into(), "webhooks".into()],
        ..Default::default()
    })
    .unwrap();
    lore.publish(LessonDraft {
        problem: "stripe checkout fails in safari".into(),
        resolution: "update stripe.js".into(),
        tags: vec!["stripe".into()],
        ..Default::default()
    })
    .unwrap();

    let results = lore
        .query(
            "stripe problems",
            &QueryOptions {
                tags: vec!["stripe".into(), "webhooks".into()],
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(results.len(), 1);
    for hit in &results {
        assert!(hit.lesson.tags.contains(&"stripe".to_string()));
        assert!(hit.lesson.tags.contains(&"webhooks".to_string()));
    }
}

#[test]
fn min_confidence_applies_to_raw_confidence() {
    let lore = memory_lore();
    // The 0.8-confidence lesson's final score lands below 0.5 (cosine is
    // well under 1.0), so it only survives if the threshold compares raw
    // confidence rather than the decayed score.
    let strong = lore
        .publish(LessonDraft {
            problem: "terraform state lock stuck".into(),
            resolution: "force-unlock with the lock id".into(),
            confidence: Some(0.8),
            ..Default::default()
        })
        .unwrap();
    lore.publish(LessonDraft {
        problem: "terraform plan drifts".into(),
        resolution: "import the resource".into(),
        confidence: Some(0.3),
        ..Default::default()
    })
    .unwrap();

    let results = lore
        .query(
            "terraform lock",
            &QueryOptions {
                min_confidence: 0.5,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].lesson.id, strong);
}

#[test]
fn project_scopes_queries_and_lists() {
    let store = Box::new(MemoryStore::new());
    let lore = Lore::builder()
        .store(store)
        .embedder(keyword_embedder())
        .project("checkout")
        .build()
        .unwrap();

    lore.publish(LessonDraft {
        problem: "checkout times out on 3DS".into(),
        resolution: "extend the webhook deadline".into(),
        ..Default::default()
    })
    .unwrap();
    lore.publish(LessonDraft {
        problem: "search results stale".into(),
        resolution: "reindex nightly".into(),
        project: Some("search".into()),
        ..Default::default()
    })
    .unwrap();

    // Default project filter applies to both list and query.
    let listed = lore.list(None, None).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].project.as_deref(), Some("checkout"));

    let results = lore.query("stale search results", &QueryOptions::default()).unwrap();
    assert!(results.iter().all(|r| r.lesson.project.as_deref() == Some("checkout")));

    let other = lore.list(Some("search"), None).unwrap();
    assert_eq!(other.len(), 1);
}

#[test]
fn export_import_round_trip_between_backends() {
    let source = memory_lore();
    for i in 0..3 {
        source
            .publish(LessonDraft {
                problem: format!("problem number {i}"),
                resolution: format!("resolution number {i}"),
                tags: vec![format!("tag{i}")],
                ..Default::default()
            })
            .unwrap();
    }

    let exported = source.export_lessons().unwrap();
    assert_eq!(exported.len(), 3);

    let dir = tempfile::tempdir().unwrap();
    let target = Lore::builder()
        .store(Box::new(
            SqliteStore::open(dir.path().join("copy.db")).unwrap(),
        ))
        .embedder(keyword_embedder())
        .build()
        .unwrap();

    assert_eq!(target.import_lessons(&exported).unwrap(), 3);
    // Second import is a no-op.
    assert_eq!(target.import_lessons(&exported).unwrap(), 0);

    // Imported lessons are queryable with the same ranking inputs.
    let results = target
        .query("problem number", &QueryOptions { limit: 10, ..Default::default() })
        .unwrap();
    assert_eq!(results.len(), 3);
    target.close().unwrap();
}
