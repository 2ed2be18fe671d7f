use crate::connection::BackendConnection;
use crate::language_detector::Language;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Instant;
use tokio::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ServerHealth {
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub last_check: Instant,
    pub is_healthy: bool,
    pub response_time_ms: u64,
    pub last_success: Option<Instant>,
    pub last_failure_reason: Option<String>,
}

impl Default for ServerHealth {
    fn default() -> Self {
        Self {
            consecutive_failures: 0,
            total_failures: 0,
            last_check: Instant::now(),
            is_healthy: true,
            response_time_ms: 0,
            last_success: None,
            last_failure_reason: None,
        }
    }
}

impl ServerHealth {
    pub fn mark_success(&mut self, response_time_ms: u64) {
        self.consecutive_failures = 0;
        self.is_healthy = true;
        self.response_time_ms = response_time_ms;
        self.last_success = Some(Instant::now());
        self.last_check = Instant::now();
        self.last_failure_reason = None;
    }

    pub fn mark_failure(&mut self, reason: &str) {
        self.consecutive_failures += 1;
        self.total_failures += 1;
        self.is_healthy = false;
        self.last_check = Instant::now();
        self.last_failure_reason = Some(reason.to_string());
    }

    pub fn report(&self) -> HealthReport {
        HealthReport {
            is_healthy: self.is_healthy,
            consecutive_failures: self.consecutive_failures,
            total_failures: self.total_failures,
            response_time_ms: self.response_time_ms,
            seconds_since_check: self.last_check.elapsed().as_secs(),
            last_failure_reason: self.last_failure_reason.clone(),
        }
    }
}

/// Serializable view of [`ServerHealth`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub is_healthy: bool,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub response_time_ms: u64,
    pub seconds_since_check: u64,
    pub last_failure_reason: Option<String>,
}

/// What to do with a connection whose probe just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    Restart { attempt: u32 },
    /// Budget exhausted: leave the connection in terminal `Error`.
    GiveUp,
}

pub fn restart_decision(restart_count: u32, max_restart_attempts: u32) -> RestartDecision {
    if restart_count < max_restart_attempts {
        RestartDecision::Restart {
            attempt: restart_count + 1,
        }
    } else {
        RestartDecision::GiveUp
    }
}

/// Probes connections and keeps per-language health records.
#[derive(Debug)]
pub struct HealthMonitor {
    health_status: DashMap<Language, ServerHealth>,
    health_check_timeout: Duration,
}

impl HealthMonitor {
    pub fn new(health_check_timeout: Duration) -> Self {
        Self {
            health_status: DashMap::new(),
            health_check_timeout,
        }
    }

    /// Local liveness first, then a lightweight request through the backend.
    pub async fn probe(
        &self,
        connection: &BackendConnection,
        method: &str,
    ) -> std::result::Result<Duration, String> {
        if !connection.transport().is_alive() {
            return Err("backend process is not running".to_string());
        }

        let start = Instant::now();
        match connection
            .transport()
            .request(method, json!({ "query": "" }), self.health_check_timeout)
            .await
        {
            Ok(_) => Ok(start.elapsed()),
            Err(e) => Err(e.to_string()),
        }
    }

    pub fn record_success(&self, language: Language, elapsed: Duration) {
        debug!(
            "Health check passed for {:?} in {}ms",
            language,
            elapsed.as_millis()
        );
        self.health_status
            .entry(language)
            .or_default()
            .mark_success(elapsed.as_millis() as u64);
    }

    pub fn record_failure(&self, language: Language, reason: &str) {
        self.health_status
            .entry(language)
            .or_default()
            .mark_failure(reason);
    }

    pub fn get(&self, language: Language) -> Option<ServerHealth> {
        self.health_status.get(&language).map(|h| h.clone())
    }

    pub fn remove(&self, language: Language) {
        self.health_status.remove(&language);
    }
}
