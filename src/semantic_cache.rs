use crate::language_detector::Language;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Methods whose results depend only on document content and position.
const CACHEABLE_METHODS: &[&str] = &[
    "textDocument/documentSymbol",
    "textDocument/definition",
    "textDocument/typeDefinition",
    "textDocument/implementation",
    "textDocument/references",
    "textDocument/hover",
];

/// Identity of a cacheable backend call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub language: Language,
    pub method: String,
    pub uri: String,
    pub position: Option<(u32, u32)>,
    /// Extra request parameters that change the answer (e.g. `includeDeclaration`).
    pub extra: Option<String>,
}

impl CacheKey {
    /// Build a key from raw request params. `None` for uncacheable methods or
    /// params without a `textDocument.uri`.
    pub fn from_request(language: Language, method: &str, params: &Value) -> Option<Self> {
        if !SemanticCache::is_cacheable(method) {
            return None;
        }

        let uri = params
            .get("textDocument")
            .and_then(|td| td.get("uri"))
            .and_then(|u| u.as_str())?
            .to_string();

        let position = params.get("position").and_then(|p| {
            let line = p.get("line")?.as_u64()? as u32;
            let character = p.get("character")?.as_u64()? as u32;
            Some((line, character))
        });

        let extra = params.get("context").map(|c| c.to_string());

        Some(Self {
            language,
            method: method.to_string(),
            uri,
            position,
            extra,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CacheMetadata {
    pub file_uri: String,
    /// Other files the result points into.
    pub dependencies: BTreeSet<String>,
    pub created_at: Instant,
    pub ttl: Duration,
    pub last_accessed: Instant,
}

impl CacheMetadata {
    pub fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.ttl
    }

    fn touches(&self, uri: &str) -> bool {
        self.file_uri == uri || self.dependencies.contains(uri)
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub result: Value,
    pub metadata: CacheMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub invalidations: u64,
}

/// TTL- and dependency-invalidated cache of backend results.
pub struct SemanticCache {
    entries: DashMap<CacheKey, CacheEntry>,
    ttl: Duration,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
}

impl SemanticCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    pub fn is_cacheable(method: &str) -> bool {
        CACHEABLE_METHODS.contains(&method)
    }

    pub fn get(&self, key: &CacheKey) -> Option<Value> {
        let expired = match self.entries.get_mut(key) {
            Some(mut entry) => {
                if entry.metadata.is_expired() {
                    true
                } else {
                    entry.metadata.last_accessed = Instant::now();
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.result.clone());
                }
            }
            None => false,
        };

        if expired {
            self.entries.remove(key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn insert(&self, key: CacheKey, result: Value) {
        let dependencies = collect_dependencies(&result, &key.uri);
        let now = Instant::now();
        let entry = CacheEntry {
            result,
            metadata: CacheMetadata {
                file_uri: key.uri.clone(),
                dependencies,
                created_at: now,
                ttl: self.ttl,
                last_accessed: now,
            },
        };
        self.entries.insert(key, entry);

        if self.entries.len() > self.max_entries {
            self.evict_oldest();
        }
    }

    /// Drop the least recently accessed 10% (at least enough to get back under the cap).
    fn evict_oldest(&self) {
        let len = self.entries.len();
        let to_evict = (len / 10).max(len.saturating_sub(self.max_entries)).max(1);

        let mut by_access: Vec<(CacheKey, Instant)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().metadata.last_accessed))
            .collect();
        by_access.sort_by_key(|(_, accessed)| *accessed);

        let mut removed = 0;
        for (key, _) in by_access.into_iter().take(to_evict) {
            if self.entries.remove(&key).is_some() {
                removed += 1;
            }
        }
        self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        debug!("Evicted {} semantic cache entries", removed);
    }

    /// Remove every entry produced for `uri` or pointing into it.
    pub fn invalidate(&self, uri: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.metadata.touches(uri));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            self.invalidations.fetch_add(removed as u64, Ordering::Relaxed);
            debug!("Invalidated {} semantic cache entries for {}", removed, uri);
        }
        removed
    }

    pub fn invalidate_language(&self, language: Language) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.language != language);
        before.saturating_sub(self.entries.len())
    }

    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.metadata.is_expired());
        let removed = before.saturating_sub(self.entries.len());
        self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    pub fn metadata(&self, key: &CacheKey) -> Option<CacheMetadata> {
        self.entries.get(key).map(|e| e.metadata.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

/// URIs of `Location` / `LocationLink` values in a result, excluding `own_uri`.
fn collect_dependencies(result: &Value, own_uri: &str) -> BTreeSet<String> {
    let mut deps = BTreeSet::new();
    let mut stack = vec![result];

    while let Some(value) = stack.pop() {
        match value {
            Value::Object(map) => {
                for field in ["uri", "targetUri"] {
                    if let Some(uri) = map.get(field).and_then(|u| u.as_str()) {
                        if uri != own_uri {
                            deps.insert(uri.to_string());
                        }
                    }
                }
                stack.extend(map.values());
            }
            Value::Array(items) => stack.extend(items.iter()),
            _ => {}
        }
    }

    deps
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(method: &str, uri: &str, line: u32) -> CacheKey {
        CacheKey {
            language: Language::Rust,
            method: method.to_string(),
            uri: uri.to_string(),
            position: Some((line, 0)),
            extra: None,
        }
    }

    #[test]
    fn test_key_from_request() {
        let params = json!({
            "textDocument": { "uri": "file:///a.rs" },
            "position": { "line": 3, "character": 7 }
        });
        let key = CacheKey::from_request(Language::Rust, "textDocument/hover", &params).unwrap();
        assert_eq!(key.position, Some((3, 7)));
        assert!(CacheKey::from_request(Language::Rust, "textDocument/completion", &params).is_none());
    }

    #[test]
    fn test_hit_miss_and_ttl() {
        let cache = SemanticCache::new(Duration::from_millis(20), 10);
        let k = key("textDocument/hover", "file:///a.rs", 1);
        assert!(cache.get(&k).is_none());
        cache.insert(k.clone(), json!({"contents": "x"}));
        assert!(cache.get(&k).is_some());

        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get(&k).is_none());
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.entries, 0);
    }

    #[test]
    fn test_dependencies_exclude_own_uri() {
        let result = json!([
            { "uri": "file:///a.rs", "range": {} },
            { "uri": "file:///b.rs", "range": {} },
            { "targetUri": "file:///c.rs" }
        ]);
        let deps = collect_dependencies(&result, "file:///a.rs");
        assert_eq!(
            deps.into_iter().collect::<Vec<_>>(),
            vec!["file:///b.rs".to_string(), "file:///c.rs".to_string()]
        );
    }

    #[test]
    fn test_invalidate_by_file_and_dependency_only() {
        let cache = SemanticCache::new(Duration::from_secs(60), 100);
        cache.insert(key("textDocument/hover", "file:///a.rs", 1), json!(null));
        cache.insert(
            key("textDocument/references", "file:///b.rs", 2),
            json!([{ "uri": "file:///a.rs" }]),
        );
        cache.insert(
            key("textDocument/definition", "file:///c.rs", 3),
            json!([{ "uri": "file:///d.rs" }]),
        );

        assert_eq!(cache.invalidate("file:///a.rs"), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache
            .get(&key("textDocument/definition", "file:///c.rs", 3))
            .is_some());
    }

    #[test]
    fn test_capacity_eviction_removes_least_recently_accessed() {
        let cache = SemanticCache::new(Duration::from_secs(60), 10);
        for i in 0..10 {
            cache.insert(key("textDocument/hover", "file:///a.rs", i), json!(i));
            std::thread::sleep(Duration::from_millis(2));
        }
        // Touch the oldest so the second-oldest becomes the eviction victim.
        assert!(cache.get(&key("textDocument/hover", "file:///a.rs", 0)).is_some());

        cache.insert(key("textDocument/hover", "file:///a.rs", 10), json!(10));
        assert_eq!(cache.len(), 10);
        assert!(cache.get(&key("textDocument/hover", "file:///a.rs", 0)).is_some());
        assert!(cache.get(&key("textDocument/hover", "file:///a.rs", 1)).is_none());
        assert_eq!(cache.stats().evictions, 1);
    }
}
