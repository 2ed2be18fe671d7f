use crate::error::{Result, SupervisorError};
use crate::symbols::{SymbolKind, SymbolRecord};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolQuery {
    pub name: Option<String>,
    pub kind: Option<SymbolKind>,
    pub file_uri: Option<String>,
    #[serde(default)]
    pub fuzzy: bool,
    pub max_results: Option<usize>,
}

impl SymbolQuery {
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn fuzzy(mut self) -> Self {
        self.fuzzy = true;
        self
    }

    pub fn with_kind(mut self, kind: SymbolKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn in_file(mut self, uri: impl Into<String>) -> Self {
        self.file_uri = Some(uri.into());
        self
    }

    pub fn limit(mut self, max_results: usize) -> Self {
        self.max_results = Some(max_results);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_results == Some(0) {
            return Err(SupervisorError::Validation(
                "maxResults must be greater than 0".to_string(),
            ));
        }
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(SupervisorError::Validation(
                    "name must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Stable key for the query-result cache.
    pub fn cache_key(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{:?}", self))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    Exact,
    Prefix,
    Fuzzy,
    /// No name in the query; matched on filters alone.
    Filter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolMatch {
    pub symbol: SymbolRecord,
    pub score: f64,
    pub match_kind: MatchKind,
}

/// Exact match scores 1.0. With `fuzzy`, case-insensitive prefix matches land
/// in `[0.6, 0.9]` and ordered subsequence matches in `[0.2, 0.5]`, both
/// favoring names close in length to the query.
pub fn score_name(query: &str, name: &str, fuzzy: bool) -> Option<(f64, MatchKind)> {
    if name == query {
        return Some((1.0, MatchKind::Exact));
    }
    if !fuzzy {
        return None;
    }

    let query_lower = query.to_lowercase();
    let name_lower = name.to_lowercase();
    let q_len = query_lower.chars().count() as f64;
    let n_len = name_lower.chars().count().max(1) as f64;
    let closeness = (q_len / n_len).min(1.0);

    if name_lower.starts_with(&query_lower) {
        return Some((0.6 + 0.3 * closeness, MatchKind::Prefix));
    }
    if is_subsequence(&query_lower, &name_lower) {
        return Some((0.2 + 0.3 * closeness, MatchKind::Fuzzy));
    }
    None
}

/// Every character of `needle` appears in `haystack` in order, not
/// necessarily contiguously.
pub fn is_subsequence(needle: &str, haystack: &str) -> bool {
    let mut remaining = haystack.chars();
    needle
        .chars()
        .all(|wanted| remaining.by_ref().any(|c| c == wanted))
}

/// Score descending, then name, uri and position for a deterministic order.
pub fn rank(matches: &mut [SymbolMatch]) {
    matches.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.symbol.name.cmp(&b.symbol.name))
            .then_with(|| a.symbol.location.uri.cmp(&b.symbol.location.uri))
            .then_with(|| {
                a.symbol
                    .location
                    .range
                    .start
                    .cmp(&b.symbol.location.range.start)
            })
    });
}
