use super::membership::{MembershipFilter, REGENERATION_THRESHOLD};
use super::query::{rank, score_name, MatchKind, SymbolMatch, SymbolQuery};
use super::snapshot::{IndexSnapshot, SNAPSHOT_VERSION};
use crate::config::IndexConfig;
use crate::error::{FileError, Result, SupervisorError};
use crate::language_detector::{Language, LanguageDetector};
use crate::supervisor::BackendSupervisor;
use crate::symbols::{parse_document_symbols, Position, SymbolKey, SymbolKind, SymbolRecord};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use ignore::WalkBuilder;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexResult {
    pub symbol_count: usize,
    pub file_count: usize,
    pub errors: Vec<FileError>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileChangeType {
    Created,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub uri: String,
    #[serde(rename = "type")]
    pub change_type: FileChangeType,
}

impl FileChange {
    pub fn new(uri: impl Into<String>, change_type: FileChangeType) -> Self {
        Self {
            uri: uri.into(),
            change_type,
        }
    }
}

/// File counts per change type, plus the files that failed to re-index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    pub updated: usize,
    pub removed: usize,
    pub added: usize,
    pub duration_ms: u64,
    pub errors: Vec<FileError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub symbols: usize,
    pub files: usize,
    pub kinds: BTreeMap<SymbolKind, usize>,
    pub filter_capacity: usize,
    pub last_update: Option<DateTime<Utc>>,
}

struct IndexState {
    symbols_by_key: HashMap<SymbolKey, SymbolRecord>,
    symbols_by_kind: HashMap<SymbolKind, BTreeSet<SymbolKey>>,
    symbols_by_file: HashMap<String, BTreeSet<SymbolKey>>,
    indexed_files: BTreeSet<String>,
    filter: MembershipFilter,
    last_update: Option<DateTime<Utc>>,
    size: usize,
    /// Bumped on every mutation; part of the query-cache key.
    generation: u64,
}

impl IndexState {
    fn new(capacity: usize, false_positive_rate: f64) -> Self {
        Self {
            symbols_by_key: HashMap::new(),
            symbols_by_kind: HashMap::new(),
            symbols_by_file: HashMap::new(),
            indexed_files: BTreeSet::new(),
            filter: MembershipFilter::new(capacity, false_positive_rate),
            last_update: None,
            size: 0,
            generation: 0,
        }
    }

    fn insert(&mut self, record: SymbolRecord) {
        let key = record.key();
        if let Some(previous) = self.symbols_by_key.get(&key) {
            if let Some(keys) = self.symbols_by_kind.get_mut(&previous.kind) {
                keys.remove(&key);
            }
        }

        self.filter.insert(&record.name);
        self.symbols_by_kind
            .entry(record.kind)
            .or_default()
            .insert(key.clone());
        self.symbols_by_file
            .entry(key.uri.clone())
            .or_default()
            .insert(key.clone());
        self.symbols_by_key.insert(key, record);
        self.size = self.symbols_by_key.len();
    }

    fn remove_file(&mut self, uri: &str) -> usize {
        self.indexed_files.remove(uri);
        let Some(keys) = self.symbols_by_file.remove(uri) else {
            return 0;
        };

        let mut removed = 0;
        for key in keys {
            if let Some(record) = self.symbols_by_key.remove(&key) {
                if let Some(kind_keys) = self.symbols_by_kind.get_mut(&record.kind) {
                    kind_keys.remove(&key);
                    if kind_keys.is_empty() {
                        self.symbols_by_kind.remove(&record.kind);
                    }
                }
                removed += 1;
            }
        }
        self.size = self.symbols_by_key.len();
        removed
    }

    /// Rebuild the filter from live names, doubling capacity until the live
    /// size sits below the regeneration threshold.
    fn regenerate_filter(&mut self, base_capacity: usize) {
        let mut capacity = base_capacity.max(1);
        while self.size as f64 > capacity as f64 * REGENERATION_THRESHOLD {
            capacity *= 2;
        }

        self.filter = MembershipFilter::build(
            self.symbols_by_key.values().map(|r| r.name.as_str()),
            capacity,
            self.filter.false_positive_rate(),
        );
        debug!(
            "Regenerated membership filter: {} names, capacity {}",
            self.size, capacity
        );
    }

    /// Regenerate once the filter has absorbed close to its capacity.
    fn maybe_regenerate(&mut self, base_capacity: usize) {
        if self.filter.needs_regeneration(self.filter.inserted()) {
            self.regenerate_filter(base_capacity);
        }
    }

    fn touch(&mut self) {
        self.generation += 1;
        self.last_update = Some(Utc::now());
    }
}

/// Project-wide symbol table built from backend `documentSymbol` responses.
pub struct SymbolIndex {
    supervisor: BackendSupervisor,
    detector: LanguageDetector,
    config: IndexConfig,
    state: RwLock<IndexState>,
    query_cache: Cache<String, Arc<Vec<SymbolMatch>>>,
}

impl std::fmt::Debug for SymbolIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymbolIndex")
            .field("config", &self.config)
            .finish()
    }
}

pub(crate) fn uri_to_path(uri: &str) -> Result<PathBuf> {
    Url::parse(uri)
        .ok()
        .and_then(|url| url.to_file_path().ok())
        .ok_or_else(|| SupervisorError::Validation(format!("not a file uri: {}", uri)))
}

pub(crate) fn path_to_uri(path: &Path) -> Result<String> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    Url::from_file_path(&absolute)
        .map(|u| u.to_string())
        .map_err(|_| SupervisorError::Validation(format!("cannot build uri for {:?}", path)))
}

impl SymbolIndex {
    pub fn new(supervisor: BackendSupervisor, config: IndexConfig) -> Self {
        let state = IndexState::new(config.filter_capacity, config.filter_false_positive_rate);
        let query_cache = Cache::builder()
            .max_capacity(config.query_cache_entries)
            .build();
        Self {
            supervisor,
            detector: LanguageDetector::new(),
            config,
            state: RwLock::new(state),
            query_cache,
        }
    }

    pub fn supervisor(&self) -> &BackendSupervisor {
        &self.supervisor
    }

    fn indexable_language(&self, path: &Path) -> Option<Language> {
        let language = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(|ext| self.detector.detect_from_extension(ext))?;
        self.supervisor.registry().get(language).map(|_| language)
    }

    /// Supported source files under `root`, skipping excluded directories.
    fn discover_files(&self, root: &Path) -> Vec<PathBuf> {
        let exclude_dirs = self.config.exclude_dirs.clone();
        let mut builder = WalkBuilder::new(root);
        builder
            .follow_links(false)
            .hidden(false)
            .git_ignore(true)
            .git_global(false)
            .git_exclude(true)
            .filter_entry(move |entry| {
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                !(is_dir
                    && entry
                        .file_name()
                        .to_str()
                        .map(|name| exclude_dirs.iter().any(|d| d == name))
                        .unwrap_or(false))
            });

        let mut files: Vec<PathBuf> = builder
            .build()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|entry| entry.into_path())
            .filter(|path| self.indexable_language(path).is_some())
            .collect();
        files.sort();
        files
    }

    /// Index every supported file under `root`. Per-file failures are
    /// collected; the call only fails when nothing could be indexed at all.
    pub async fn index_project(&self, root: &Path) -> Result<IndexResult> {
        let start = Instant::now();
        let metadata = tokio::fs::metadata(root).await?;
        if !metadata.is_dir() {
            return Err(SupervisorError::Validation(format!(
                "{:?} is not a directory",
                root
            )));
        }

        let files = self.discover_files(root);
        info!("Indexing {} file(s) under {:?}", files.len(), root);

        let outcomes: Vec<(PathBuf, Result<usize>)> = stream::iter(files)
            .map(|path| async move {
                let outcome = self.index_file(&path).await;
                (path, outcome)
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut result = IndexResult::default();
        for (path, outcome) in outcomes {
            match outcome {
                Ok(count) => {
                    result.file_count += 1;
                    result.symbol_count += count;
                }
                Err(e) => {
                    warn!("Failed to index {:?}: {}", path, e);
                    result.errors.push(FileError {
                        path: path.display().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }
        result.errors.sort_by(|a, b| a.path.cmp(&b.path));

        {
            let mut state = self.state.write().await;
            state.regenerate_filter(self.config.filter_capacity);
            state.touch();
        }
        self.query_cache.invalidate_all();

        result.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Indexed {} symbol(s) from {} file(s) in {}ms ({} error(s))",
            result.symbol_count,
            result.file_count,
            result.duration_ms,
            result.errors.len()
        );

        if result.file_count == 0 && !result.errors.is_empty() {
            return Err(SupervisorError::IndexingPartialFailure {
                errors: result.errors,
            });
        }
        Ok(result)
    }

    /// (Re)index one file, replacing whatever was indexed for it before.
    /// Returns the number of symbols now indexed for the file.
    pub async fn index_file(&self, path: &Path) -> Result<usize> {
        let language = self.detector.detect_async(path).await;
        if language == Language::Unknown || self.supervisor.registry().get(language).is_none() {
            return Err(SupervisorError::UnsupportedLanguage(format!("{:?}", path)));
        }

        let metadata = tokio::fs::metadata(path).await?;
        if metadata.len() > self.config.max_file_size_bytes {
            return Err(SupervisorError::Validation(format!(
                "{:?} exceeds the maximum indexable size ({} bytes)",
                path, self.config.max_file_size_bytes
            )));
        }

        let content = tokio::fs::read_to_string(path).await?;
        let uri = path_to_uri(path)?;

        self.supervisor.ensure_workspace_root(language, path);
        self.supervisor
            .synchronize_document(&uri, &content, language)
            .await?;
        let response = self
            .supervisor
            .request(
                language,
                "textDocument/documentSymbol",
                json!({ "textDocument": { "uri": uri } }),
            )
            .await?;
        let symbols = parse_document_symbols(&uri, &response)?;
        let count = symbols.len();

        self.supervisor
            .record_token_reduction(language, content.len(), count);

        {
            let mut state = self.state.write().await;
            state.remove_file(&uri);
            for symbol in symbols {
                state.insert(symbol);
            }
            state.indexed_files.insert(uri.clone());
            state.maybe_regenerate(self.config.filter_capacity);
            state.touch();
        }
        self.query_cache.invalidate_all();

        debug!("Indexed {} symbol(s) from {}", count, uri);
        Ok(count)
    }

    pub async fn update_index(&self, changes: &[FileChange]) -> Result<UpdateResult> {
        let start = Instant::now();
        let mut result = UpdateResult::default();

        for change in changes {
            match change.change_type {
                FileChangeType::Deleted => {
                    self.invalidate_index(&change.uri).await;
                    result.removed += 1;
                }
                FileChangeType::Created | FileChangeType::Modified => {
                    self.invalidate_index(&change.uri).await;
                    let outcome = match uri_to_path(&change.uri) {
                        Ok(path) => self.index_file(&path).await,
                        Err(e) => Err(e),
                    };
                    match outcome {
                        Ok(_) if change.change_type == FileChangeType::Created => {
                            result.added += 1
                        }
                        Ok(_) => result.updated += 1,
                        Err(e) => {
                            warn!("Failed to re-index {}: {}", change.uri, e);
                            result.errors.push(FileError {
                                path: change.uri.clone(),
                                message: e.to_string(),
                            });
                        }
                    }
                }
            }
        }

        result.duration_ms = start.elapsed().as_millis() as u64;
        Ok(result)
    }

    pub async fn find_symbols(&self, query: &SymbolQuery) -> Result<Vec<SymbolMatch>> {
        query.validate()?;
        let max_results = query
            .max_results
            .unwrap_or(self.config.default_max_results);

        let state = self.state.read().await;
        let cache_key = format!("{}:{}", state.generation, query.cache_key());
        if let Some(cached) = self.query_cache.get(&cache_key).await {
            return Ok(cached.as_ref().clone());
        }

        if let Some(name) = &query.name {
            if !query.fuzzy && !state.filter.might_contain(name) {
                debug!("Membership filter rules out '{}'", name);
                return Ok(Vec::new());
            }
        }

        let candidates: Box<dyn Iterator<Item = &SymbolKey> + Send> =
            match (&query.file_uri, query.kind) {
                (Some(uri), _) => match state.symbols_by_file.get(uri) {
                    Some(keys) => Box::new(keys.iter()),
                    None => Box::new(std::iter::empty()),
                },
                (None, Some(kind)) => match state.symbols_by_kind.get(&kind) {
                    Some(keys) => Box::new(keys.iter()),
                    None => Box::new(std::iter::empty()),
                },
                (None, None) => Box::new(state.symbols_by_key.keys()),
            };

        let mut matches: Vec<SymbolMatch> = candidates
            .filter_map(|key| state.symbols_by_key.get(key))
            .filter(|record| query.kind.map_or(true, |kind| record.kind == kind))
            .filter(|record| {
                query
                    .file_uri
                    .as_deref()
                    .map_or(true, |uri| record.location.uri == uri)
            })
            .filter_map(|record| {
                let (score, match_kind) = match &query.name {
                    Some(name) => score_name(name, &record.name, query.fuzzy)?,
                    None => (1.0, MatchKind::Filter),
                };
                Some(SymbolMatch {
                    symbol: record.clone(),
                    score,
                    match_kind,
                })
            })
            .collect();
        drop(state);

        rank(&mut matches);
        matches.truncate(max_results);

        self.query_cache
            .insert(cache_key, Arc::new(matches.clone()))
            .await;
        Ok(matches)
    }

    /// Drop every symbol for `uri`. Returns how many were removed.
    pub async fn invalidate_index(&self, uri: &str) -> usize {
        let removed = {
            let mut state = self.state.write().await;
            let removed = state.remove_file(uri);
            state.touch();
            removed
        };
        self.query_cache.invalidate_all();
        if removed > 0 {
            debug!("Removed {} symbol(s) for {}", removed, uri);
        }
        removed
    }

    pub async fn rebuild_index(&self, uri: &str) -> Result<usize> {
        self.invalidate_index(uri).await;
        let path = uri_to_path(uri)?;
        self.index_file(&path).await
    }

    pub async fn get_full_index(&self) -> IndexSnapshot {
        let state = self.state.read().await;
        let mut symbols: Vec<SymbolRecord> = state.symbols_by_key.values().cloned().collect();
        symbols.sort_by_key(|s| s.key());
        IndexSnapshot {
            version: SNAPSHOT_VERSION,
            symbols,
            indexed_files: state.indexed_files.iter().cloned().collect(),
            last_update: state.last_update,
            filter_capacity: state.filter.capacity(),
        }
    }

    /// Replace the whole index with `snapshot`; the filter is rebuilt.
    pub async fn restore_index(&self, snapshot: IndexSnapshot) -> Result<()> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SupervisorError::Validation(format!(
                "unsupported index snapshot version {}",
                snapshot.version
            )));
        }

        let capacity = snapshot.filter_capacity.max(self.config.filter_capacity);
        let mut fresh = IndexState::new(capacity, self.config.filter_false_positive_rate);
        for symbol in snapshot.symbols {
            fresh.insert(symbol);
        }
        fresh.indexed_files.extend(snapshot.indexed_files);
        fresh.regenerate_filter(capacity);

        {
            let mut state = self.state.write().await;
            fresh.generation = state.generation + 1;
            fresh.last_update = snapshot.last_update.or_else(|| Some(Utc::now()));
            *state = fresh;
        }
        self.query_cache.invalidate_all();
        Ok(())
    }

    /// Innermost indexed symbol whose range contains `position`.
    pub async fn symbol_at(&self, uri: &str, position: Position) -> Option<SymbolRecord> {
        let state = self.state.read().await;
        state
            .symbols_by_file
            .get(uri)?
            .iter()
            .filter_map(|key| state.symbols_by_key.get(key))
            .filter(|record| record.location.range.contains(position))
            .min_by_key(|record| record.location.range.span())
            .cloned()
    }

    pub async fn symbols_in_file(&self, uri: &str) -> Vec<SymbolRecord> {
        let state = self.state.read().await;
        let Some(keys) = state.symbols_by_file.get(uri) else {
            return Vec::new();
        };
        keys.iter()
            .filter_map(|key| state.symbols_by_key.get(key))
            .cloned()
            .collect()
    }

    pub async fn stats(&self) -> IndexStats {
        let state = self.state.read().await;
        IndexStats {
            symbols: state.size,
            files: state.indexed_files.len(),
            kinds: state
                .symbols_by_kind
                .iter()
                .map(|(kind, keys)| (*kind, keys.len()))
                .collect(),
            filter_capacity: state.filter.capacity(),
            last_update: state.last_update,
        }
    }

    pub async fn size(&self) -> usize {
        self.state.read().await.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::{Location, Range, SymbolHierarchy};

    fn record(name: &str, uri: &str, line: u32) -> SymbolRecord {
        SymbolRecord {
            name: name.to_string(),
            kind: SymbolKind::Function,
            location: Location::new(
                uri,
                Range::new(Position::new(line, 0), Position::new(line + 1, 0)),
            ),
            selection_range: None,
            container_name: None,
            type_info: None,
            references: Vec::new(),
            implementations: Vec::new(),
            hierarchy: SymbolHierarchy::default(),
        }
    }

    #[test]
    fn test_state_keeps_size_in_sync() {
        let mut state = IndexState::new(100, 0.01);
        state.insert(record("a", "file:///x.rs", 1));
        state.insert(record("a", "file:///x.rs", 5));
        state.insert(record("a", "file:///x.rs", 5));
        state.insert(record("b", "file:///y.rs", 1));
        assert_eq!(state.size, 3);
        assert_eq!(state.size, state.symbols_by_key.len());

        assert_eq!(state.remove_file("file:///x.rs"), 2);
        assert_eq!(state.size, 1);
        assert!(state.symbols_by_kind[&SymbolKind::Function].len() == 1);
    }

    #[test]
    fn test_filter_grows_past_threshold() {
        let mut state = IndexState::new(10, 0.01);
        for i in 0..50 {
            state.insert(record(&format!("sym{i}"), "file:///big.rs", i));
            state.maybe_regenerate(10);
        }
        assert!(state.filter.capacity() >= 50);
        for i in 0..50 {
            assert!(state.filter.might_contain(&format!("sym{i}")));
        }
    }

    #[test]
    fn test_uri_path_conversion() {
        let uri = path_to_uri(Path::new("/tmp/project/main.rs")).unwrap();
        assert_eq!(uri, "file:///tmp/project/main.rs");
        assert_eq!(uri_to_path(&uri).unwrap(), PathBuf::from("/tmp/project/main.rs"));
        assert!(uri_to_path("https://example.com/x").is_err());
    }
}
