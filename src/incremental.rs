use crate::language_detector::Language;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum UpdatePriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// A queued document change waiting to be pushed to a backend.
#[derive(Debug, Clone)]
pub struct IncrementalUpdateTask {
    pub uri: String,
    pub language: Language,
    /// `TextDocumentContentChangeEvent` values, sent as-is.
    pub changes: Vec<Value>,
    pub priority: UpdatePriority,
    pub timestamp: Instant,
    pub processed: bool,
    seq: u64,
}

/// Per-language task lists. Each language's list is its own map shard entry,
/// so queuing for one language never waits on another.
#[derive(Debug, Default)]
pub struct IncrementalQueue {
    tasks: DashMap<Language, Vec<IncrementalUpdateTask>>,
    next_seq: AtomicU64,
}

impl IncrementalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &self,
        uri: impl Into<String>,
        language: Language,
        changes: Vec<Value>,
        priority: UpdatePriority,
    ) {
        let task = IncrementalUpdateTask {
            uri: uri.into(),
            language,
            changes,
            priority,
            timestamp: Instant::now(),
            processed: false,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        };
        self.tasks.entry(language).or_default().push(task);
    }

    /// Claim the highest-priority unprocessed task (oldest first on ties) and
    /// mark it processed so no other tick can pick it up again.
    pub fn claim_next(&self, language: Language) -> Option<IncrementalUpdateTask> {
        let mut tasks = self.tasks.get_mut(&language)?;
        let task = tasks
            .iter_mut()
            .filter(|t| !t.processed)
            .max_by(|a, b| a.priority.cmp(&b.priority).then(b.seq.cmp(&a.seq)))?;
        task.processed = true;
        Some(task.clone())
    }

    /// Drop processed tasks; returns how many were removed.
    pub fn purge_processed(&self) -> usize {
        let mut removed = 0;
        for mut entry in self.tasks.iter_mut() {
            let before = entry.len();
            entry.retain(|t| !t.processed);
            removed += before - entry.len();
        }
        self.tasks.retain(|_, tasks| !tasks.is_empty());
        removed
    }

    pub fn languages(&self) -> Vec<Language> {
        self.tasks
            .iter()
            .filter(|e| e.value().iter().any(|t| !t.processed))
            .map(|e| *e.key())
            .collect()
    }

    pub fn pending(&self, language: Language) -> usize {
        self.tasks
            .get(&language)
            .map(|tasks| tasks.iter().filter(|t| !t.processed).count())
            .unwrap_or(0)
    }

    pub fn remove_language(&self, language: Language) {
        self.tasks.remove(&language);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_by_priority_then_age() {
        let queue = IncrementalQueue::new();
        queue.push("file:///a.py", Language::Python, vec![], UpdatePriority::Normal);
        queue.push("file:///b.py", Language::Python, vec![], UpdatePriority::High);
        queue.push("file:///c.py", Language::Python, vec![], UpdatePriority::High);

        assert_eq!(queue.claim_next(Language::Python).unwrap().uri, "file:///b.py");
        assert_eq!(queue.claim_next(Language::Python).unwrap().uri, "file:///c.py");
        assert_eq!(queue.claim_next(Language::Python).unwrap().uri, "file:///a.py");
        assert!(queue.claim_next(Language::Python).is_none());

        assert_eq!(queue.purge_processed(), 3);
        assert!(queue.languages().is_empty());
    }

    #[test]
    fn test_languages_are_independent() {
        let queue = IncrementalQueue::new();
        queue.push("file:///a.go", Language::Go, vec![], UpdatePriority::Low);
        queue.push("file:///a.rs", Language::Rust, vec![], UpdatePriority::Low);
        queue.claim_next(Language::Go);
        assert_eq!(queue.pending(Language::Go), 0);
        assert_eq!(queue.pending(Language::Rust), 1);
        assert_eq!(queue.languages(), vec![Language::Rust]);
    }
}
