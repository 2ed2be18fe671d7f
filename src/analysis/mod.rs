//! Semantic analysis on top of backend symbol data and the project index.

pub mod analyzer;
pub mod graph;
pub mod insights;
pub mod patterns;
pub mod types;

pub use analyzer::SemanticAnalyzer;
pub use graph::{DependencyEdge, DependencyGraph, GraphMetrics, GraphNode};
pub use patterns::GOD_CLASS;
pub use types::{
    AnalysisContext, AnalysisResult, CompletionItem, DetectedPattern, Insight, InsightSeverity,
    PatternCategory, SymbolInfo, TypeInformation,
};
