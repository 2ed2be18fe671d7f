use crate::language_detector::Language;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Rough characters-per-token ratio for raw source text.
const CHARS_PER_TOKEN: f64 = 4.0;
/// Rough token cost of one structured symbol entry.
const TOKENS_PER_SYMBOL: f64 = 15.0;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MethodStats {
    pub count: u64,
    pub failures: u64,
    pub avg_latency_ms: f64,
    pub success_rate: f64,
}

impl MethodStats {
    fn record(&mut self, latency: Duration, success: bool) {
        self.count += 1;
        if !success {
            self.failures += 1;
        }
        let n = self.count as f64;
        let latency_ms = latency.as_secs_f64() * 1000.0;
        self.avg_latency_ms += (latency_ms - self.avg_latency_ms) / n;
        let outcome = if success { 1.0 } else { 0.0 };
        self.success_rate += (outcome - self.success_rate) / n;
    }
}

/// Informational estimate of what structured results save over raw text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenReduction {
    pub samples: u64,
    pub raw_tokens: u64,
    pub structured_tokens: u64,
    pub average_reduction: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendMetrics {
    pub language: Language,
    pub requests_total: u64,
    pub requests_failed: u64,
    pub notifications_sent: u64,
    pub notifications_failed: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub methods: BTreeMap<String, MethodStats>,
    pub token_reduction: TokenReduction,
    pub last_request_at: Option<DateTime<Utc>>,
}

impl BackendMetrics {
    pub fn new(language: Language) -> Self {
        Self {
            language,
            requests_total: 0,
            requests_failed: 0,
            notifications_sent: 0,
            notifications_failed: 0,
            cache_hits: 0,
            cache_misses: 0,
            methods: BTreeMap::new(),
            token_reduction: TokenReduction::default(),
            last_request_at: None,
        }
    }

    pub fn record_request(&mut self, method: &str, latency: Duration, success: bool) {
        self.requests_total += 1;
        if !success {
            self.requests_failed += 1;
        }
        self.last_request_at = Some(Utc::now());
        self.methods
            .entry(method.to_string())
            .or_default()
            .record(latency, success);
    }

    pub fn record_notification(&mut self, success: bool) {
        if success {
            self.notifications_sent += 1;
        } else {
            self.notifications_failed += 1;
        }
    }

    pub fn record_cache(&mut self, hit: bool) {
        if hit {
            self.cache_hits += 1;
        } else {
            self.cache_misses += 1;
        }
    }

    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }

    /// Returns the reduction for this sample in `[0, 1]`.
    pub fn record_token_reduction(&mut self, raw_chars: usize, symbol_count: usize) -> f64 {
        let raw = (raw_chars as f64 / CHARS_PER_TOKEN).ceil();
        let structured = symbol_count as f64 * TOKENS_PER_SYMBOL;
        let reduction = if raw <= 0.0 {
            0.0
        } else {
            (1.0 - structured / raw).clamp(0.0, 1.0)
        };

        let stats = &mut self.token_reduction;
        stats.samples += 1;
        stats.raw_tokens += raw as u64;
        stats.structured_tokens += structured as u64;
        stats.average_reduction += (reduction - stats.average_reduction) / stats.samples as f64;
        reduction
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_averages() {
        let mut metrics = BackendMetrics::new(Language::Python);
        metrics.record_request("textDocument/hover", Duration::from_millis(10), true);
        metrics.record_request("textDocument/hover", Duration::from_millis(30), false);

        let hover = &metrics.methods["textDocument/hover"];
        assert_eq!(hover.count, 2);
        assert!((hover.avg_latency_ms - 20.0).abs() < 0.01);
        assert!((hover.success_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(metrics.requests_failed, 1);
    }

    #[test]
    fn test_token_reduction_is_bounded() {
        let mut metrics = BackendMetrics::new(Language::Python);
        let r = metrics.record_token_reduction(4000, 10);
        assert!((r - 0.85).abs() < 1e-9);
        assert_eq!(metrics.record_token_reduction(40, 100), 0.0);
        assert_eq!(metrics.record_token_reduction(0, 0), 0.0);
        assert_eq!(metrics.token_reduction.samples, 3);
    }
}
