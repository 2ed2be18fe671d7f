//! Dependency graph over symbols: nodes are symbols, an edge `a -> b` means
//! a reference to `b` was found inside the range of `a`.

use crate::symbols::{Position, SymbolKey, SymbolKind, SymbolRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub key: SymbolKey,
    pub name: String,
    pub kind: SymbolKind,
    pub uri: String,
    /// Outgoing edge count (coupling).
    pub outgoing: usize,
    pub incoming: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub from: usize,
    pub to: usize,
    /// Number of reference sites collapsed into this edge.
    pub weight: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphMetrics {
    pub node_count: usize,
    pub edge_count: usize,
    /// `E - N + 2`, floored at 1. A threshold trigger, not a certified metric.
    pub cyclomatic_complexity: i64,
    pub max_coupling: usize,
    pub average_coupling: f64,
    /// Edge density in `[0, 1]`.
    pub cohesion: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DependencyGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<DependencyEdge>,
    pub metrics: GraphMetrics,
    #[serde(skip)]
    lookup: HashMap<SymbolKey, usize>,
    #[serde(skip)]
    edge_lookup: HashMap<(usize, usize), usize>,
}

impl DependencyGraph {
    pub fn from_symbols(symbols: &[SymbolRecord]) -> Self {
        let mut graph = Self::default();
        for symbol in symbols {
            graph.add_node(symbol);
        }
        graph.compute_metrics();
        graph
    }

    pub fn add_node(&mut self, symbol: &SymbolRecord) -> usize {
        let key = symbol.key();
        if let Some(&idx) = self.lookup.get(&key) {
            return idx;
        }
        let idx = self.nodes.len();
        self.nodes.push(GraphNode {
            key: key.clone(),
            name: symbol.name.clone(),
            kind: symbol.kind,
            uri: symbol.location.uri.clone(),
            outgoing: 0,
            incoming: 0,
        });
        self.lookup.insert(key, idx);
        idx
    }

    pub fn node(&self, key: &SymbolKey) -> Option<&GraphNode> {
        self.lookup.get(key).map(|&idx| &self.nodes[idx])
    }

    /// Record a dependency. Self edges and unknown endpoints are ignored;
    /// repeated edges bump the weight. Returns whether a new edge was added.
    pub fn add_edge(&mut self, from: &SymbolKey, to: &SymbolKey) -> bool {
        let (Some(&from), Some(&to)) = (self.lookup.get(from), self.lookup.get(to)) else {
            return false;
        };
        if from == to {
            return false;
        }
        if let Some(&edge) = self.edge_lookup.get(&(from, to)) {
            self.edges[edge].weight += 1;
            return false;
        }
        self.edge_lookup.insert((from, to), self.edges.len());
        self.edges.push(DependencyEdge {
            from,
            to,
            weight: 1,
        });
        self.nodes[from].outgoing += 1;
        self.nodes[to].incoming += 1;
        true
    }

    pub fn dependencies_of(&self, key: &SymbolKey) -> Vec<&GraphNode> {
        let Some(&idx) = self.lookup.get(key) else {
            return Vec::new();
        };
        self.edges
            .iter()
            .filter(|e| e.from == idx)
            .map(|e| &self.nodes[e.to])
            .collect()
    }

    pub fn compute_metrics(&mut self) {
        let n = self.nodes.len();
        let e = self.edges.len();
        let max_coupling = self.nodes.iter().map(|n| n.outgoing).max().unwrap_or(0);
        let average_coupling = if n == 0 { 0.0 } else { e as f64 / n as f64 };
        let cohesion = if n < 2 {
            0.0
        } else {
            (e as f64 / (n * (n - 1)) as f64).min(1.0)
        };
        self.metrics = GraphMetrics {
            node_count: n,
            edge_count: e,
            cyclomatic_complexity: (e as i64 - n as i64 + 2).max(1),
            max_coupling,
            average_coupling,
            cohesion,
        };
    }
}

/// Innermost symbol in `uri` whose range contains `position`, skipping `exclude`.
pub fn enclosing_symbol<'a>(
    symbols: &'a [SymbolRecord],
    uri: &str,
    position: Position,
    exclude: Option<&SymbolKey>,
) -> Option<&'a SymbolRecord> {
    symbols
        .iter()
        .filter(|s| s.location.uri == uri && s.location.range.contains(position))
        .filter(|s| exclude.map_or(true, |k| s.key() != *k))
        .min_by_key(|s| s.location.range.span())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::{Location, Range, SymbolHierarchy};

    fn sym(name: &str, kind: SymbolKind, start: u32, end: u32) -> SymbolRecord {
        SymbolRecord {
            name: name.to_string(),
            kind,
            location: Location::new(
                "file:///a.rs",
                Range::new(Position::new(start, 0), Position::new(end, 0)),
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
    fn test_edges_dedupe_and_skip_self() {
        let a = sym("a", SymbolKind::Function, 0, 5);
        let b = sym("b", SymbolKind::Function, 6, 9);
        let mut graph = DependencyGraph::from_symbols(&[a.clone(), b.clone()]);

        assert!(graph.add_edge(&a.key(), &b.key()));
        assert!(!graph.add_edge(&a.key(), &b.key()));
        assert!(!graph.add_edge(&a.key(), &a.key()));
        graph.compute_metrics();

        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.edges[0].weight, 2);
        assert_eq!(graph.metrics.max_coupling, 1);
        assert_eq!(graph.dependencies_of(&a.key())[0].name, "b");
    }

    #[test]
    fn test_complexity_floor_and_growth() {
        let symbols: Vec<_> = (0..4)
            .map(|i| sym(&format!("f{i}"), SymbolKind::Function, i * 10, i * 10 + 5))
            .collect();
        let mut graph = DependencyGraph::from_symbols(&symbols);
        assert_eq!(graph.metrics.cyclomatic_complexity, 1);

        for from in &symbols {
            for to in &symbols {
                graph.add_edge(&from.key(), &to.key());
            }
        }
        graph.compute_metrics();
        // 12 edges, 4 nodes
        assert_eq!(graph.metrics.cyclomatic_complexity, 10);
        assert!((graph.metrics.cohesion - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_enclosing_symbol_prefers_innermost() {
        let class = sym("Service", SymbolKind::Class, 0, 50);
        let method = sym("run", SymbolKind::Method, 10, 20);
        let symbols = vec![class.clone(), method.clone()];

        let found = enclosing_symbol(&symbols, "file:///a.rs", Position::new(12, 4), None);
        assert_eq!(found.map(|s| s.name.as_str()), Some("run"));

        let found = enclosing_symbol(
            &symbols,
            "file:///a.rs",
            Position::new(12, 4),
            Some(&method.key()),
        );
        assert_eq!(found.map(|s| s.name.as_str()), Some("Service"));
        assert!(enclosing_symbol(&symbols, "file:///b.rs", Position::new(12, 4), None).is_none());
    }
}
