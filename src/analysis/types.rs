//! Data carried in and out of the semantic analyzer.

use crate::language_detector::Language;
use crate::symbols::{Location, Position, SymbolKey, SymbolKind, SymbolRecord};
use serde::{Deserialize, Serialize};

use super::graph::DependencyGraph;

/// What to analyze. `content`, when present, is synchronized to the backend
/// before symbols are fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisContext {
    pub uri: String,
    pub language: Language,
    pub position: Option<Position>,
    pub content: Option<String>,
}

impl AnalysisContext {
    pub fn new(uri: impl Into<String>, language: Language) -> Self {
        Self {
            uri: uri.into(),
            language,
            position: None,
            content: None,
        }
    }

    pub fn at(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub(crate) fn cache_key(&self) -> AnalysisKey {
        AnalysisKey {
            uri: self.uri.clone(),
            language: self.language,
            position: self.position.map(|p| (p.line, p.character)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct AnalysisKey {
    pub uri: String,
    pub language: Language,
    pub position: Option<(u32, u32)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternCategory {
    DesignPattern,
    AntiPattern,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedPattern {
    pub name: String,
    pub category: PatternCategory,
    /// Name of the symbol the pattern was found on.
    pub symbol: String,
    pub location: Location,
    pub confidence: f64,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    /// Short type label, e.g. "God Class" or "High Complexity".
    pub category: String,
    pub severity: InsightSeverity,
    pub message: String,
    pub symbol: Option<String>,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub uri: String,
    pub language: Language,
    pub symbols: Vec<SymbolRecord>,
    /// Innermost symbol around the requested position, if any.
    pub focus: Option<SymbolKey>,
    pub dependency_graph: DependencyGraph,
    pub patterns: Vec<DetectedPattern>,
    pub insights: Vec<Insight>,
    pub confidence: f64,
    /// Reference lookups that failed and were skipped.
    pub degraded_lookups: usize,
}

impl AnalysisResult {
    pub fn insights_of(&self, category: &str) -> impl Iterator<Item = &Insight> {
        let category = category.to_string();
        self.insights.iter().filter(move |i| i.category == category)
    }

    /// True when the result draws on symbols in `uri`, directly or through
    /// a cross-file dependency edge.
    pub fn touches(&self, uri: &str) -> bool {
        self.uri == uri || self.dependency_graph.nodes.iter().any(|n| n.uri == uri)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub name: String,
    pub kind: Option<SymbolKind>,
    /// Index record for the definition, when the file has been indexed.
    pub symbol: Option<SymbolRecord>,
    pub definitions: Vec<Location>,
    pub type_definitions: Vec<Location>,
    pub references: Vec<Location>,
    pub implementations: Vec<Location>,
    pub documentation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeInformation {
    pub type_definitions: Vec<Location>,
    pub signature: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionItem {
    pub label: String,
    pub kind: Option<u64>,
    pub detail: Option<String>,
}

impl CompletionItem {
    pub(crate) fn from_value(value: &serde_json::Value) -> Option<Self> {
        Some(Self {
            label: value.get("label")?.as_str()?.to_string(),
            kind: value.get("kind").and_then(|k| k.as_u64()),
            detail: value
                .get("detail")
                .and_then(|d| d.as_str())
                .map(str::to_string),
        })
    }
}
