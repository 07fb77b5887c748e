//! In-memory store backed by a mutex-guarded map. Useful for tests and
//! short-lived embedded use.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;

use crate::error::Result;
use crate::lesson::Lesson;

use super::{rank_candidates, ListOptions, ScoredLesson, SearchOptions, Store, Vote};

/// Map-backed lesson store. Every operation takes the single mutex, and
/// lessons are cloned on the way in and out so callers can never observe
/// mutation through retained references.
#[derive(Default)]
pub struct MemoryStore {
    lessons: Mutex<HashMap<String, Lesson>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Lesson>> {
        // A poisoned mutex means another caller panicked mid-operation;
        // the map itself is never left partially updated.
        self.lessons.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Store for MemoryStore {
    fn save(&self, lesson: &Lesson) -> Result<()> {
        self.lock().insert(lesson.id.clone(), lesson.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Lesson>> {
        Ok(self.lock().get(id).cloned())
    }

    fn list(&self, options: &ListOptions) -> Result<Vec<Lesson>> {
        let mut lessons: Vec<Lesson> = self
            .lock()
            .values()
            .filter(|lesson| match &options.project {
                Some(project) => lesson.project.as_deref() == Some(project),
                None => true,
            })
            .cloned()
            .collect();

        lessons.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        if let Some(limit) = options.limit {
            lessons.truncate(limit);
        }
        Ok(lessons)
    }

    fn update(&self, lesson: &Lesson) -> Result<bool> {
        let mut lessons = self.lock();
        match lessons.get_mut(&lesson.id) {
            Some(stored) => {
                stored.confidence = lesson.confidence;
                stored.tags = lesson.tags.clone();
                stored.upvotes = lesson.upvotes;
                stored.downvotes = lesson.downvotes;
                stored.meta = lesson.meta.clone();
                stored.updated_at = lesson.updated_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.lock().remove(id).is_some())
    }

    fn search(&self, embedding: &[f32], options: &SearchOptions) -> Result<Vec<ScoredLesson>> {
        let candidates: Vec<Lesson> = self
            .lock()
            .values()
            .filter(|lesson| match &options.project {
                Some(project) => lesson.project.as_deref() == Some(project),
                None => true,
            })
            .cloned()
            .collect();

        Ok(rank_candidates(candidates, embedding, options, Utc::now()))
    }

    fn increment_vote(&self, id: &str, vote: Vote) -> Result<bool> {
        // The single mutex makes the read-modify-write atomic here.
        let mut lessons = self.lock();
        match lessons.get_mut(id) {
            Some(lesson) => {
                match vote {
                    Vote::Up => lesson.upvotes += 1,
                    Vote::Down => lesson.downvotes += 1,
                }
                lesson.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::EMBEDDING_DIM;
    use crate::lesson::generate_id;

    fn lesson(project: Option<&str>) -> Lesson {
        let now = Utc::now();
        Lesson {
            id: generate_id(),
            problem: "p".into(),
            resolution: "r".into(),
            context: None,
            tags: vec![],
            confidence: 0.5,
            source: None,
            project: project.map(String::from),
            embedding: Some(vec![1.0; EMBEDDING_DIM]),
            created_at: now,
            updated_at: now,
            expires_at: None,
            upvotes: 0,
            downvotes: 0,
            meta: None,
        }
    }

    #[test]
    fn save_then_get_round_trips() {
        let store = MemoryStore::new();
        let original = lesson(None);
        store.save(&original).unwrap();
        let fetched = store.get(&original.id).unwrap().unwrap();
        assert_eq!(fetched.id, original.id);
        assert_eq!(fetched.problem, "p");
    }

    #[test]
    fn callers_cannot_mutate_through_retained_copies() {
        let store = MemoryStore::new();
        let mut original = lesson(None);
        store.save(&original).unwrap();

        // Mutating the caller's copy must not affect the stored record.
        original.problem = "tampered".into();
        let fetched = store.get(&original.id).unwrap().unwrap();
        assert_eq!(fetched.problem, "p");
    }

    #[test]
    fn list_filters_project_and_orders_newest_first() {
        let store = MemoryStore::new();
        let a = lesson(Some("alpha"));
        let b = lesson(Some("alpha"));
        let c = lesson(Some("beta"));
        for l in [&a, &b, &c] {
            store.save(l).unwrap();
        }

        let listed = store
            .list(&ListOptions {
                project: Some("alpha".into()),
                limit: None,
            })
            .unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].created_at >= listed[1].created_at);

        let limited = store
            .list(&ListOptions {
                project: None,
                limit: Some(2),
            })
            .unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn update_unknown_id_returns_false() {
        let store = MemoryStore::new();
        assert!(!store.update(&lesson(None)).unwrap());
    }

    #[test]
    fn delete_reports_existence() {
        let store = MemoryStore::new();
        let l = lesson(None);
        store.save(&l).unwrap();
        assert!(store.delete(&l.id).unwrap());
        assert!(!store.delete(&l.id).unwrap());
    }

    #[test]
    fn vote_increments_and_touches_updated_at() {
        let store = MemoryStore::new();
        let l = lesson(None);
        store.save(&l).unwrap();

        assert!(store.increment_vote(&l.id, Vote::Up).unwrap());
        assert!(store.increment_vote(&l.id, Vote::Up).unwrap());
        assert!(store.increment_vote(&l.id, Vote::Down).unwrap());

        let fetched = store.get(&l.id).unwrap().unwrap();
        assert_eq!(fetched.upvotes, 2);
        assert_eq!(fetched.downvotes, 1);
        assert!(fetched.updated_at >= l.updated_at);

        assert!(!store.increment_vote("missing", Vote::Up).unwrap());
    }
}
