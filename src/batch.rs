use crate::error::Result;
use crate::language_detector::Language;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Instant;
use tokio::sync::oneshot;

/// A request waiting for the next batch tick.
#[derive(Debug)]
pub struct BatchRequest {
    pub language: Language,
    pub method: String,
    pub params: Value,
    pub enqueued_at: Instant,
    pub(crate) responder: oneshot::Sender<Result<Value>>,
}

/// Outcome summary of one request executed during a tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub language: Language,
    pub method: String,
    pub success: bool,
    pub queued_ms: u64,
}

#[derive(Debug, Default)]
pub struct BatchQueue {
    queues: DashMap<Language, VecDeque<BatchRequest>>,
}

impl BatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &self,
        language: Language,
        method: &str,
        params: Value,
    ) -> oneshot::Receiver<Result<Value>> {
        let (responder, receiver) = oneshot::channel();
        self.queues.entry(language).or_default().push_back(BatchRequest {
            language,
            method: method.to_string(),
            params,
            enqueued_at: Instant::now(),
            responder,
        });
        receiver
    }

    /// Take up to `max` requests for `language`, oldest first.
    pub fn drain(&self, language: Language, max: usize) -> Vec<BatchRequest> {
        match self.queues.get_mut(&language) {
            Some(mut queue) => {
                let take = queue.len().min(max);
                queue.drain(..take).collect()
            }
            None => Vec::new(),
        }
    }

    pub fn languages(&self) -> Vec<Language> {
        self.queues
            .iter()
            .filter(|e| !e.value().is_empty())
            .map(|e| *e.key())
            .collect()
    }

    pub fn pending(&self, language: Language) -> usize {
        self.queues.get(&language).map(|q| q.len()).unwrap_or(0)
    }

    /// Drop queued requests; their receivers observe a closed channel.
    pub fn remove_language(&self, language: Language) -> usize {
        self.queues
            .remove(&language)
            .map(|(_, q)| q.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_drain_respects_batch_size() {
        let queue = BatchQueue::new();
        let _receivers: Vec<_> = (0..5)
            .map(|i| queue.push(Language::Java, "textDocument/hover", json!({ "i": i })))
            .collect();

        let first = queue.drain(Language::Java, 3);
        assert_eq!(first.len(), 3);
        assert_eq!(first[0].params["i"], 0);
        assert_eq!(queue.pending(Language::Java), 2);
        assert_eq!(queue.drain(Language::Java, 3).len(), 2);
        assert!(queue.languages().is_empty());
    }
}
