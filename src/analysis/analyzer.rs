use super::graph::{enclosing_symbol, DependencyGraph};
use super::insights::{confidence_score, synthesize_insights};
use super::patterns::detect_patterns;
use super::types::{
    AnalysisContext, AnalysisKey, AnalysisResult, CompletionItem, SymbolInfo, TypeInformation,
};
use crate::config::AnalyzerConfig;
use crate::error::Result;
use crate::index::symbol_index::uri_to_path;
use crate::index::SymbolIndex;
use crate::language_detector::{Language, LanguageDetector};
use crate::supervisor::BackendSupervisor;
use crate::symbols::{hover_text, parse_document_symbols, parse_locations, Location, Position, SymbolRecord};
use futures::stream::{self, StreamExt};
use moka::future::Cache;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

const REFERENCE_CONCURRENCY: usize = 8;

/// Builds dependency graphs, pattern matches and insights for a file from
/// backend symbol and reference data. Results are cached per
/// `(uri, language, position)` until their TTL runs out or a file they
/// draw on is invalidated.
pub struct SemanticAnalyzer {
    supervisor: BackendSupervisor,
    index: Arc<SymbolIndex>,
    detector: LanguageDetector,
    config: AnalyzerConfig,
    cache: Cache<AnalysisKey, Arc<AnalysisResult>>,
}

fn position_params(uri: &str, position: Position) -> Value {
    json!({
        "textDocument": { "uri": uri },
        "position": { "line": position.line, "character": position.character },
    })
}

impl SemanticAnalyzer {
    pub fn new(supervisor: BackendSupervisor, index: Arc<SymbolIndex>, config: AnalyzerConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.cache_max_entries)
            .time_to_live(config.cache_ttl())
            .support_invalidation_closures()
            .build();
        Self {
            supervisor,
            index,
            detector: LanguageDetector::new(),
            config,
            cache,
        }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Full analysis of one file. Fails only when the symbol fetch fails;
    /// missing reference data lowers the confidence instead.
    pub async fn analyze_code(&self, context: &AnalysisContext) -> Result<AnalysisResult> {
        if self.sync_content(context).await? {
            self.invalidate(&context.uri);
        }

        let key = context.cache_key();
        if let Some(hit) = self.cache.get(&key).await {
            debug!("Analysis cache hit for {}", context.uri);
            return Ok((*hit).clone());
        }

        let response = self
            .supervisor
            .request(
                context.language,
                "textDocument/documentSymbol",
                json!({ "textDocument": { "uri": context.uri } }),
            )
            .await?;
        let mut symbols = parse_document_symbols(&context.uri, &response)?;

        let focus = context
            .position
            .and_then(|p| enclosing_symbol(&symbols, &context.uri, p, None))
            .cloned();

        let mut graph = DependencyGraph::from_symbols(&symbols);
        let degraded_lookups = self
            .collect_dependencies(context, &mut symbols, focus.as_ref(), &mut graph)
            .await;
        graph.compute_metrics();

        let patterns = detect_patterns(&symbols, self.config.god_class_threshold);
        let insights = synthesize_insights(&graph, &patterns, &self.config);
        let confidence = confidence_score(&symbols, &graph, &patterns);

        info!(
            "Analyzed {}: {} symbols, {} edges, {} patterns, confidence {:.2}",
            context.uri,
            symbols.len(),
            graph.edges.len(),
            patterns.len(),
            confidence
        );

        let result = AnalysisResult {
            uri: context.uri.clone(),
            language: context.language,
            symbols,
            focus: focus.map(|f| f.key()),
            dependency_graph: graph,
            patterns,
            insights,
            confidence,
            degraded_lookups,
        };
        self.cache.insert(key, Arc::new(result.clone())).await;
        Ok(result)
    }

    /// Push explicit content, or the on-disk file if the backend has not seen it yet.
    /// Returns whether the backend's view of the document changed.
    async fn sync_content(&self, context: &AnalysisContext) -> Result<bool> {
        let content = match &context.content {
            Some(content) => content.clone(),
            None if self.supervisor.is_synchronized(&context.uri) => return Ok(false),
            None => {
                let Ok(path) = uri_to_path(&context.uri) else {
                    return Ok(false);
                };
                match tokio::fs::read_to_string(&path).await {
                    Ok(content) => {
                        self.supervisor.ensure_workspace_root(context.language, &path);
                        content
                    }
                    Err(e) => {
                        debug!("Not synchronizing {}: {}", context.uri, e);
                        return Ok(false);
                    }
                }
            }
        };
        self.supervisor
            .synchronize_document(&context.uri, &content, context.language)
            .await
    }

    /// Look up references for the symbols in scope and turn each reference
    /// site into an edge from its enclosing symbol. Returns the number of
    /// lookups that failed.
    async fn collect_dependencies(
        &self,
        context: &AnalysisContext,
        symbols: &mut [SymbolRecord],
        focus: Option<&SymbolRecord>,
        graph: &mut DependencyGraph,
    ) -> usize {
        let targets: Vec<usize> = symbols
            .iter()
            .enumerate()
            .filter(|(_, s)| s.kind.is_callable() || s.kind.is_type_definition())
            .filter(|(_, s)| {
                focus.map_or(true, |f| f.location.range.contains(s.location.range.start))
            })
            .map(|(i, _)| i)
            .take(self.config.max_reference_lookups)
            .collect();

        let lookups: Vec<(usize, Option<Vec<Location>>)> = stream::iter(targets)
            .map(|i| {
                let mut params = position_params(&context.uri, symbols[i].anchor());
                params["context"] = json!({ "includeDeclaration": false });
                async move {
                    let found = self
                        .advisory(context.language, "textDocument/references", params)
                        .await
                        .map(|v| parse_locations(&v));
                    (i, found)
                }
            })
            .buffer_unordered(REFERENCE_CONCURRENCY)
            .collect()
            .await;

        let mut failed = 0;
        for (target, found) in lookups {
            let Some(locations) = found else {
                failed += 1;
                continue;
            };
            let target_key = symbols[target].key();
            for location in &locations {
                let source = if location.uri == context.uri {
                    enclosing_symbol(symbols, &location.uri, location.range.start, None).cloned()
                } else {
                    self.index.symbol_at(&location.uri, location.range.start).await
                };
                if let Some(source) = source {
                    graph.add_node(&source);
                    graph.add_edge(&source.key(), &target_key);
                }
            }
            symbols[target].references = locations;
        }
        if failed > 0 {
            debug!("{} reference lookup(s) failed for {}", failed, context.uri);
        }
        failed
    }

    fn language_for(&self, uri: &str) -> Option<Language> {
        let language = self.detector.detect_from_uri(uri);
        self.supervisor.registry().get(language).map(|_| language)
    }

    /// Backend call whose failure is logged and swallowed.
    async fn advisory(&self, language: Language, method: &str, params: Value) -> Option<Value> {
        match self.supervisor.request(language, method, params).await {
            Ok(value) => Some(value),
            Err(e) => {
                if e.is_advisory_degradable() {
                    debug!("{} degraded to empty result: {}", method, e);
                } else {
                    warn!("{} failed: {}", method, e);
                }
                None
            }
        }
    }

    async fn locations(&self, uri: &str, position: Position, method: &str) -> Vec<Location> {
        let Some(language) = self.language_for(uri) else {
            return Vec::new();
        };
        self.advisory(language, method, position_params(uri, position))
            .await
            .map(|v| parse_locations(&v))
            .unwrap_or_default()
    }

    /// Everything known about the symbol at `position`, or `None` when the
    /// definition lookup fails or finds nothing.
    pub async fn resolve_symbol(&self, uri: &str, position: Position) -> Option<SymbolInfo> {
        let language = self.language_for(uri)?;
        let definitions = match self
            .supervisor
            .request(language, "textDocument/definition", position_params(uri, position))
            .await
        {
            Ok(value) => parse_locations(&value),
            Err(e) => {
                debug!("Cannot resolve symbol at {}:{:?}: {}", uri, position, e);
                return None;
            }
        };

        let (type_definitions, references, implementations, documentation) = tokio::join!(
            self.locations(uri, position, "textDocument/typeDefinition"),
            self.find_references(uri, position, false),
            self.find_implementations(uri, position),
            self.get_hover_info(uri, position),
        );

        let mut symbol = None;
        if let Some(definition) = definitions.first() {
            symbol = self
                .index
                .symbol_at(&definition.uri, definition.range.start)
                .await;
        }
        if symbol.is_none() {
            symbol = self.index.symbol_at(uri, position).await;
        }
        if symbol.is_none() && definitions.is_empty() {
            return None;
        }

        let name = symbol
            .as_ref()
            .map(|s| s.name.clone())
            .or_else(|| documentation.as_deref().and_then(first_code_line))
            .unwrap_or_default();

        Some(SymbolInfo {
            name,
            kind: symbol.as_ref().map(|s| s.kind),
            symbol,
            definitions,
            type_definitions,
            references,
            implementations,
            documentation,
        })
    }

    pub async fn find_references(
        &self,
        uri: &str,
        position: Position,
        include_declaration: bool,
    ) -> Vec<Location> {
        let Some(language) = self.language_for(uri) else {
            return Vec::new();
        };
        let mut params = position_params(uri, position);
        params["context"] = json!({ "includeDeclaration": include_declaration });
        self.advisory(language, "textDocument/references", params)
            .await
            .map(|v| parse_locations(&v))
            .unwrap_or_default()
    }

    pub async fn find_implementations(&self, uri: &str, position: Position) -> Vec<Location> {
        self.locations(uri, position, "textDocument/implementation")
            .await
    }

    pub async fn get_type_information(&self, uri: &str, position: Position) -> Option<TypeInformation> {
        let type_definitions = self
            .locations(uri, position, "textDocument/typeDefinition")
            .await;
        let signature = match self.index.symbol_at(uri, position).await {
            Some(symbol) if symbol.type_info.is_some() => symbol.type_info,
            _ => self
                .get_hover_info(uri, position)
                .await
                .as_deref()
                .and_then(first_code_line),
        };
        if type_definitions.is_empty() && signature.is_none() {
            return None;
        }
        Some(TypeInformation {
            type_definitions,
            signature,
        })
    }

    pub async fn get_hover_info(&self, uri: &str, position: Position) -> Option<String> {
        let language = self.language_for(uri)?;
        let hover = self
            .advisory(language, "textDocument/hover", position_params(uri, position))
            .await?;
        hover_text(&hover)
    }

    pub async fn get_completions(&self, uri: &str, position: Position) -> Vec<CompletionItem> {
        let Some(language) = self.language_for(uri) else {
            return Vec::new();
        };
        let Some(response) = self
            .advisory(language, "textDocument/completion", position_params(uri, position))
            .await
        else {
            return Vec::new();
        };
        // CompletionItem[] or CompletionList
        let items = response
            .as_array()
            .or_else(|| response.get("items").and_then(|i| i.as_array()));
        items
            .map(|items| items.iter().filter_map(CompletionItem::from_value).collect())
            .unwrap_or_default()
    }

    /// Drop cached analyses that draw on `uri`.
    pub fn invalidate(&self, uri: &str) {
        let uri = uri.to_string();
        if let Err(e) = self
            .cache
            .invalidate_entries_if(move |_, result| result.touches(&uri))
        {
            warn!("Failed to register analysis invalidation: {}", e);
        }
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    pub fn cached_results(&self) -> u64 {
        self.cache.entry_count()
    }
}

/// First non-fence, non-empty line of a hover text.
fn first_code_line(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with("```"))
        .map(str::to_string)
}
