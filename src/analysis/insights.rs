//! Turn graph metrics and detected patterns into insights and a confidence score.

use super::graph::DependencyGraph;
use super::patterns::HIGH_CONFIDENCE;
use super::types::{DetectedPattern, Insight, InsightSeverity, PatternCategory};
use crate::config::AnalyzerConfig;
use crate::symbols::SymbolRecord;

pub const HIGH_COMPLEXITY: &str = "High Complexity";
pub const HIGH_COUPLING: &str = "High Coupling";
pub const LIMITED_DEPENDENCY_DATA: &str = "Limited Dependency Data";
pub const DESIGN_PATTERN: &str = "Design Pattern";

const TYPE_INFO_WEIGHT: f64 = 0.4;
const DEPENDENCY_WEIGHT: f64 = 0.3;
const PATTERN_WEIGHT: f64 = 0.3;

pub fn synthesize_insights(
    graph: &DependencyGraph,
    patterns: &[DetectedPattern],
    config: &AnalyzerConfig,
) -> Vec<Insight> {
    let mut insights = Vec::new();

    for p in patterns {
        let (category, severity) = match p.category {
            PatternCategory::AntiPattern => (p.name.clone(), InsightSeverity::Warning),
            PatternCategory::DesignPattern => (DESIGN_PATTERN.to_string(), InsightSeverity::Info),
        };
        insights.push(Insight {
            category,
            severity,
            message: format!("{}: {}", p.name, p.description),
            symbol: Some(p.symbol.clone()),
            confidence: p.confidence,
        });
    }

    let complexity = graph.metrics.cyclomatic_complexity;
    if complexity > config.complexity_threshold {
        let severity = if complexity > config.complexity_threshold * 2 {
            InsightSeverity::Critical
        } else {
            InsightSeverity::Warning
        };
        insights.push(Insight {
            category: HIGH_COMPLEXITY.to_string(),
            severity,
            message: format!(
                "Dependency complexity {} exceeds threshold {}",
                complexity, config.complexity_threshold
            ),
            symbol: None,
            confidence: 0.7,
        });
    }

    for node in graph
        .nodes
        .iter()
        .filter(|n| n.outgoing > config.coupling_threshold)
    {
        insights.push(Insight {
            category: HIGH_COUPLING.to_string(),
            severity: InsightSeverity::Warning,
            message: format!(
                "{} depends on {} other symbols (threshold {})",
                node.name, node.outgoing, config.coupling_threshold
            ),
            symbol: Some(node.name.clone()),
            confidence: 0.65,
        });
    }

    if graph.edges.is_empty() && graph.nodes.len() > 1 {
        insights.push(Insight {
            category: LIMITED_DEPENDENCY_DATA.to_string(),
            severity: InsightSeverity::Info,
            message: "No reference data was available; dependency metrics are incomplete"
                .to_string(),
            symbol: None,
            confidence: 0.5,
        });
    }

    insights
}

/// Weighted combination of type-info coverage, presence of dependency data
/// and the share of high-confidence patterns. Always within `[0, 1]`.
pub fn confidence_score(
    symbols: &[SymbolRecord],
    graph: &DependencyGraph,
    patterns: &[DetectedPattern],
) -> f64 {
    let typed = if symbols.is_empty() {
        0.0
    } else {
        symbols.iter().filter(|s| s.type_info.is_some()).count() as f64 / symbols.len() as f64
    };
    let dependencies = if graph.edges.is_empty() { 0.0 } else { 1.0 };
    let strong_patterns = if patterns.is_empty() {
        0.0
    } else {
        patterns
            .iter()
            .filter(|p| p.confidence >= HIGH_CONFIDENCE)
            .count() as f64
            / patterns.len() as f64
    };

    (TYPE_INFO_WEIGHT * typed + DEPENDENCY_WEIGHT * dependencies + PATTERN_WEIGHT * strong_patterns)
        .clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::patterns::GOD_CLASS;
    use crate::symbols::{Location, Position, Range, SymbolHierarchy, SymbolKind};

    fn sym(name: &str, line: u32, typed: bool) -> SymbolRecord {
        SymbolRecord {
            name: name.to_string(),
            kind: SymbolKind::Function,
            location: Location::new(
                "file:///m.py",
                Range::new(Position::new(line, 0), Position::new(line, 9)),
            ),
            selection_range: None,
            container_name: None,
            type_info: typed.then(|| "fn()".to_string()),
            references: Vec::new(),
            implementations: Vec::new(),
            hierarchy: SymbolHierarchy::default(),
        }
    }

    #[test]
    fn test_complexity_threshold_crossing() {
        let symbols: Vec<_> = (0..6).map(|i| sym(&format!("f{i}"), i * 3, false)).collect();
        let mut graph = DependencyGraph::from_symbols(&symbols);
        let config = AnalyzerConfig::default();

        assert!(synthesize_insights(&graph, &[], &config)
            .iter()
            .all(|i| i.category != HIGH_COMPLEXITY));

        for a in &symbols {
            for b in &symbols {
                graph.add_edge(&a.key(), &b.key());
            }
        }
        graph.compute_metrics();
        assert!(graph.metrics.cyclomatic_complexity > config.complexity_threshold);
        let insights = synthesize_insights(&graph, &[], &config);
        assert!(insights.iter().any(|i| i.category == HIGH_COMPLEXITY));
        assert!(insights.iter().all(|i| i.category != LIMITED_DEPENDENCY_DATA));
    }

    #[test]
    fn test_anti_pattern_becomes_warning() {
        let owner = sym("Everything", 0, false);
        let pattern = DetectedPattern {
            name: GOD_CLASS.to_string(),
            category: PatternCategory::AntiPattern,
            symbol: owner.name.clone(),
            location: owner.location.clone(),
            confidence: 0.85,
            description: "too many methods".to_string(),
        };
        let graph = DependencyGraph::from_symbols(&[owner]);
        let insights = synthesize_insights(&graph, &[pattern], &AnalyzerConfig::default());
        let god = insights.iter().find(|i| i.category == GOD_CLASS).unwrap();
        assert_eq!(god.severity, InsightSeverity::Warning);
        assert!((god.confidence - 0.85).abs() < f64::EPSILON);
    }

    #[test]
    fn test_confidence_bounds() {
        assert_eq!(confidence_score(&[], &DependencyGraph::default(), &[]), 0.0);

        let symbols = vec![sym("a", 0, true), sym("b", 2, true)];
        let mut graph = DependencyGraph::from_symbols(&symbols);
        graph.add_edge(&symbols[0].key(), &symbols[1].key());
        let score = confidence_score(&symbols, &graph, &[]);
        assert!(score > 0.6 && score <= 1.0);

        let untyped = vec![sym("a", 0, false), sym("b", 2, false)];
        let bare = DependencyGraph::from_symbols(&untyped);
        assert!(confidence_score(&untyped, &bare, &[]) < score);
    }
}
