//! Backend supervision: pooled connections, semantic caching, document
//! synchronization, batching, incremental updates and health checks.
//!
//! All mutable state is bucketed per language. A language's pool sits behind
//! its own async mutex; caches, metrics and queues are sharded maps. Work for
//! one language never waits on another language's lock.

use crate::backend_registry::{BackendConfig, BackendRegistry};
use crate::batch::{BatchQueue, BatchResult};
use crate::config::SupervisorConfig;
use crate::connection::{perform_handshake, BackendConnection, ConnectionStatus};
use crate::error::{Result, SupervisorError};
use crate::events::{EventBus, SupervisorEvent};
use crate::health_monitor::{restart_decision, HealthMonitor, HealthReport, RestartDecision};
use crate::incremental::{IncrementalQueue, UpdatePriority};
use crate::language_detector::Language;
use crate::lsp_process::ProcessLauncher;
use crate::metrics::BackendMetrics;
use crate::pool::{ConnectionPool, PoolSelection};
use crate::semantic_cache::{CacheKey, CacheStats, SemanticCache};
use crate::transport::{BackendLauncher, TransportError};
use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Last content pushed to a backend for one document.
#[derive(Debug, Clone)]
struct DocumentSnapshot {
    language: Language,
    /// `None` once the document was edited through incremental changes.
    digest: Option<String>,
    version: i64,
    connection_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionReport {
    pub id: Uuid,
    pub status: ConnectionStatus,
    pub restart_count: u32,
    pub pid: Option<u32>,
    pub uptime_secs: u64,
    pub heartbeat_age_ms: u64,
    pub last_error: Option<String>,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerStatusReport {
    pub language: Language,
    pub server_id: String,
    /// Status of the active connection, or of the first pooled one.
    pub status: ConnectionStatus,
    pub pool_size: usize,
    pub max_pool_size: usize,
    pub connections: Vec<ConnectionReport>,
    pub health: Option<HealthReport>,
}

struct SupervisorInner {
    config: SupervisorConfig,
    registry: BackendRegistry,
    launcher: Arc<dyn BackendLauncher>,
    pools: DashMap<Language, Arc<Mutex<ConnectionPool>>>,
    workspace_roots: DashMap<Language, PathBuf>,
    cache: SemanticCache,
    metrics: DashMap<Language, BackendMetrics>,
    documents: DashMap<String, DocumentSnapshot>,
    health: HealthMonitor,
    health_tasks: DashMap<Language, JoinHandle<()>>,
    background_tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
    batch_queue: BatchQueue,
    incremental_queue: IncrementalQueue,
    events: EventBus,
}

impl Drop for SupervisorInner {
    fn drop(&mut self) {
        for task in self.health_tasks.iter() {
            task.value().abort();
        }
        if let Ok(mut tasks) = self.background_tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

/// Cheaply cloneable handle; clones share all state.
#[derive(Clone)]
pub struct BackendSupervisor {
    inner: Arc<SupervisorInner>,
}

impl std::fmt::Debug for BackendSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendSupervisor")
            .field("languages", &self.inner.pools.len())
            .field("cache_entries", &self.inner.cache.len())
            .finish()
    }
}

impl BackendSupervisor {
    pub fn new(
        config: SupervisorConfig,
        registry: BackendRegistry,
        launcher: Arc<dyn BackendLauncher>,
    ) -> Self {
        let cache = SemanticCache::new(config.cache_ttl(), config.cache_max_entries);
        let health = HealthMonitor::new(config.health_probe_timeout());
        Self {
            inner: Arc::new(SupervisorInner {
                config,
                registry,
                launcher,
                pools: DashMap::new(),
                workspace_roots: DashMap::new(),
                cache,
                metrics: DashMap::new(),
                documents: DashMap::new(),
                health,
                health_tasks: DashMap::new(),
                background_tasks: std::sync::Mutex::new(Vec::new()),
                batch_queue: BatchQueue::new(),
                incremental_queue: IncrementalQueue::new(),
                events: EventBus::new(),
            }),
        }
    }

    /// Real backend processes, built-in registry merged with user overrides.
    pub fn with_process_launcher(config: SupervisorConfig) -> Self {
        Self::new(config, BackendRegistry::new(), Arc::new(ProcessLauncher))
    }

    fn from_weak(weak: &Weak<SupervisorInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.inner.registry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.inner.events.subscribe()
    }

    fn backend_config(&self, language: Language) -> Result<&BackendConfig> {
        self.inner
            .registry
            .get(language)
            .ok_or_else(|| SupervisorError::UnsupportedLanguage(language.to_string()))
    }

    /// Pin the workspace root used when a language's backend is first spawned.
    pub fn set_workspace_root(&self, language: Language, root: impl Into<PathBuf>) {
        self.inner.workspace_roots.insert(language, root.into());
    }

    /// Derive the workspace root from a file's project markers, unless one is set.
    pub fn ensure_workspace_root(&self, language: Language, file_path: &Path) {
        if self.inner.workspace_roots.contains_key(&language) {
            return;
        }
        if let Some(root) = self.inner.registry.find_project_root(file_path, language) {
            debug!("Workspace root for {:?}: {:?}", language, root);
            self.inner.workspace_roots.insert(language, root);
        }
    }

    fn pool_for(&self, language: Language) -> Result<Arc<Mutex<ConnectionPool>>> {
        self.backend_config(language)?;
        let max = self.inner.config.max_pool_size;
        Ok(self
            .inner
            .pools
            .entry(language)
            .or_insert_with(|| Arc::new(Mutex::new(ConnectionPool::new(language, max))))
            .clone())
    }

    fn with_metrics<T>(&self, language: Language, f: impl FnOnce(&mut BackendMetrics) -> T) -> T {
        let mut metrics = self
            .inner
            .metrics
            .entry(language)
            .or_insert_with(|| BackendMetrics::new(language));
        f(metrics.value_mut())
    }

    async fn spawn_connection(
        &self,
        language: Language,
        id: Uuid,
        restart_count: u32,
    ) -> Result<Arc<BackendConnection>> {
        let config = self.backend_config(language)?;
        let root = self
            .inner
            .workspace_roots
            .get(&language)
            .map(|r| r.value().clone());

        let transport = self
            .inner
            .launcher
            .launch(config, root.as_deref())
            .await
            .map_err(|e| SupervisorError::BackendUnavailable {
                language,
                reason: format!("failed to start {}: {:#}", config.command, e),
            })?;

        match perform_handshake(transport.as_ref(), config, root.as_deref()).await {
            Ok(capabilities) => Ok(Arc::new(BackendConnection::new(
                id,
                config,
                root,
                transport,
                capabilities,
                restart_count,
            ))),
            Err(e) => {
                if let Err(shutdown_err) = transport.shutdown().await {
                    debug!("Cleanup after failed handshake: {}", shutdown_err);
                }
                Err(SupervisorError::BackendUnavailable {
                    language,
                    reason: format!("handshake failed: {:#}", e),
                })
            }
        }
    }

    /// Returns a running connection or fails with `BackendUnavailable`.
    pub async fn initialize(&self, language: Language) -> Result<Arc<BackendConnection>> {
        let connection = self.get_pooled_connection(language).await?;
        if connection.status() != ConnectionStatus::Running {
            return Err(SupervisorError::BackendUnavailable {
                language,
                reason: format!("connection is {:?}", connection.status()),
            });
        }
        Ok(connection)
    }

    pub async fn get_pooled_connection(&self, language: Language) -> Result<Arc<BackendConnection>> {
        let pool = self.pool_for(language)?;
        let mut pool = pool.lock().await;

        let connection = match pool.select() {
            PoolSelection::Reuse(connection) => {
                connection.touch();
                connection
            }
            PoolSelection::Spawn => {
                let connection = self.spawn_connection(language, Uuid::new_v4(), 0).await?;
                pool.insert(connection.clone());
                info!(
                    "Started backend for {:?} ({} of {})",
                    language,
                    pool.len(),
                    pool.max_size()
                );
                self.inner.events.publish(SupervisorEvent::ServerStarted {
                    language,
                    connection_id: connection.id,
                });
                connection
            }
            PoolSelection::Evict(victim) => {
                info!(
                    "Pool for {:?} is full, recycling least recently used connection {}",
                    language, victim.id
                );
                pool.remove(victim.id);
                victim.close().await;
                self.forget_documents_on(victim.id);

                let connection = self.spawn_connection(language, Uuid::new_v4(), 0).await?;
                pool.insert(connection.clone());
                self.inner.events.publish(SupervisorEvent::ServerStarted {
                    language,
                    connection_id: connection.id,
                });
                connection
            }
        };
        drop(pool);

        self.ensure_health_task(language);
        Ok(connection)
    }

    /// Forward a request, serving cacheable methods from the semantic cache.
    pub async fn request(&self, language: Language, method: &str, params: Value) -> Result<Value> {
        let key = CacheKey::from_request(language, method, &params);
        if let Some(key) = &key {
            if let Some(cached) = self.inner.cache.get(key) {
                self.with_metrics(language, |m| m.record_cache(true));
                debug!("Cache hit for {} on {}", method, key.uri);
                return Ok(cached);
            }
            self.with_metrics(language, |m| m.record_cache(false));
        }

        let connection = self.get_pooled_connection(language).await?;
        let result = self.execute(&connection, method, params).await?;

        if let Some(key) = key {
            self.inner.cache.insert(key, result.clone());
        }
        Ok(result)
    }

    async fn execute(
        &self,
        connection: &BackendConnection,
        method: &str,
        params: Value,
    ) -> Result<Value> {
        let language = connection.language;
        let timeout = self.inner.config.request_timeout();
        let start = Instant::now();

        let outcome = connection.transport().request(method, params, timeout).await;
        let elapsed = start.elapsed();
        self.with_metrics(language, |m| m.record_request(method, elapsed, outcome.is_ok()));

        match outcome {
            Ok(result) => {
                connection.touch();
                Ok(result)
            }
            Err(TransportError::Timeout) => {
                warn!("{} on {:?} timed out after {:?}", method, language, timeout);
                Err(SupervisorError::BackendTimeout {
                    language,
                    method: method.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
            Err(TransportError::Io(message)) => {
                connection.mark_error(message.clone());
                Err(SupervisorError::backend(language, method, message))
            }
            Err(e @ TransportError::Response { .. }) => {
                Err(SupervisorError::backend(language, method, e))
            }
        }
    }

    /// Fire-and-forget notification. Failures are returned, never retried.
    pub async fn notify(&self, language: Language, method: &str, params: Value) -> Result<()> {
        let connection = self.get_pooled_connection(language).await?;
        self.notify_on(&connection, method, params).await
    }

    async fn notify_on(
        &self,
        connection: &BackendConnection,
        method: &str,
        params: Value,
    ) -> Result<()> {
        let outcome = connection.transport().notify(method, params).await;
        self.with_metrics(connection.language, |m| m.record_notification(outcome.is_ok()));
        outcome.map_err(|e| SupervisorError::backend(connection.language, method, e))
    }

    /// Push `content` to the backend unless it matches what was last sent.
    /// Returns whether a notification went out.
    pub async fn synchronize_document(
        &self,
        uri: &str,
        content: &str,
        language: Language,
    ) -> Result<bool> {
        let digest = format!("{:x}", md5::compute(content.as_bytes()));
        let previous = self.inner.documents.get(uri).map(|d| d.value().clone());

        let connection = self.get_pooled_connection(language).await?;

        let reopened = match &previous {
            Some(prev) if prev.connection_id == connection.id => {
                if prev.digest.as_deref() == Some(digest.as_str()) {
                    return Ok(false);
                }
                false
            }
            _ => true,
        };

        let version = if reopened {
            self.notify_on(
                &connection,
                "textDocument/didOpen",
                json!({
                    "textDocument": {
                        "uri": uri,
                        "languageId": language.language_id(),
                        "version": 1,
                        "text": content
                    }
                }),
            )
            .await?;
            1
        } else {
            let version = previous.as_ref().map(|p| p.version).unwrap_or(0) + 1;
            self.notify_on(
                &connection,
                "textDocument/didChange",
                json!({
                    "textDocument": { "uri": uri, "version": version },
                    "contentChanges": [{ "text": content }]
                }),
            )
            .await?;
            version
        };

        let content_changed = previous
            .as_ref()
            .map(|p| p.digest.as_deref() != Some(digest.as_str()))
            .unwrap_or(false);

        self.inner.documents.insert(
            uri.to_string(),
            DocumentSnapshot {
                language,
                digest: Some(digest),
                version,
                connection_id: connection.id,
            },
        );

        if content_changed {
            self.invalidate_semantic_cache(uri);
        }
        Ok(true)
    }

    fn forget_documents_on(&self, connection_id: Uuid) {
        self.inner
            .documents
            .retain(|_, doc| doc.connection_id != connection_id);
    }

    /// Whether some content for `uri` has been pushed to a live backend.
    pub fn is_synchronized(&self, uri: &str) -> bool {
        self.inner.documents.contains_key(uri)
    }

    pub fn invalidate_semantic_cache(&self, uri: &str) -> usize {
        self.inner.cache.invalidate(uri)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    // --- batching ---

    pub fn queue_request(
        &self,
        language: Language,
        method: &str,
        params: Value,
    ) -> oneshot::Receiver<Result<Value>> {
        self.inner.batch_queue.push(language, method, params)
    }

    /// Drain up to `batch_size` queued requests per language and run them.
    /// Languages proceed concurrently, as do the requests within a language.
    pub async fn process_batch_tick(&self) -> Vec<BatchResult> {
        let batch_size = self.inner.config.batch_size;
        let groups = self
            .inner
            .batch_queue
            .languages()
            .into_iter()
            .map(|language| (language, self.inner.batch_queue.drain(language, batch_size)))
            .collect::<Vec<_>>();

        let runs = groups.into_iter().map(|(language, requests)| async move {
            debug!("Batch tick: {} request(s) for {:?}", requests.len(), language);
            let executions = requests.into_iter().map(|request| async move {
                let queued_ms = request.enqueued_at.elapsed().as_millis() as u64;
                let outcome = self
                    .request(request.language, &request.method, request.params)
                    .await;
                let success = outcome.is_ok();
                let _ = request.responder.send(outcome);
                BatchResult {
                    language: request.language,
                    method: request.method,
                    success,
                    queued_ms,
                }
            });
            join_all(executions).await
        });

        join_all(runs).await.into_iter().flatten().collect()
    }

    // --- incremental updates ---

    pub fn queue_incremental_update(
        &self,
        uri: &str,
        language: Language,
        changes: Vec<Value>,
        priority: UpdatePriority,
    ) {
        self.inner
            .incremental_queue
            .push(uri, language, changes, priority);
    }

    /// Apply one task per language (highest priority first), then purge
    /// processed tasks. Returns the number of tasks applied.
    pub async fn process_incremental_tick(&self) -> usize {
        let languages = self.inner.incremental_queue.languages();
        let runs = languages.into_iter().map(|language| async move {
            let Some(task) = self.inner.incremental_queue.claim_next(language) else {
                return 0_usize;
            };

            match self.apply_incremental(&task.uri, language, task.changes).await {
                Ok(true) => {}
                Ok(false) => debug!("Incremental update for {} not applied", task.uri),
                Err(e) => warn!("Incremental update for {} failed: {}", task.uri, e),
            }

            self.invalidate_semantic_cache(&task.uri);
            self.inner.events.publish(SupervisorEvent::DocumentChanged {
                language,
                uri: task.uri,
            });
            1_usize
        });

        let applied = join_all(runs).await.into_iter().sum();
        self.inner.incremental_queue.purge_processed();
        applied
    }

    /// Send `changes` as a `didChange` for a document this connection has
    /// opened. Returns `false` when the document is not open there.
    async fn apply_incremental(
        &self,
        uri: &str,
        language: Language,
        changes: Vec<Value>,
    ) -> Result<bool> {
        let connection = self.get_pooled_connection(language).await?;
        let version = {
            let Some(mut doc) = self.inner.documents.get_mut(uri) else {
                warn!("Skipping incremental update for {}: document was never opened", uri);
                return Ok(false);
            };
            if doc.connection_id != connection.id {
                drop(doc);
                self.inner.documents.remove(uri);
                warn!(
                    "Skipping incremental update for {}: document is not open on connection {}",
                    uri, connection.id
                );
                return Ok(false);
            }
            doc.version += 1;
            doc.digest = None;
            doc.version
        };

        self.notify_on(
            &connection,
            "textDocument/didChange",
            json!({
                "textDocument": { "uri": uri, "version": version },
                "contentChanges": changes
            }),
        )
        .await?;
        Ok(true)
    }

    // --- health ---

    fn ensure_health_task(&self, language: Language) {
        if self.inner.health_tasks.contains_key(&language) {
            return;
        }
        let Ok(config) = self.backend_config(language) else {
            return;
        };
        let period = config.health_check_interval();
        let weak = Arc::downgrade(&self.inner);

        self.inner.health_tasks.entry(language).or_insert_with(|| {
            debug!("Starting health checks for {:?} every {:?}", language, period);
            tokio::spawn(async move {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let Some(supervisor) = Self::from_weak(&weak) else {
                        break;
                    };
                    supervisor.run_health_check(language).await;
                }
            })
        });
    }

    /// Probe every pooled connection for `language`. Failed connections are
    /// restarted while they have restart budget left; past that they stay in
    /// terminal `Error` and are no longer probed.
    pub async fn run_health_check(&self, language: Language) {
        let Some(pool) = self.inner.pools.get(&language).map(|p| p.value().clone()) else {
            return;
        };
        let Ok(config) = self.backend_config(language) else {
            return;
        };
        let max_restarts = config.max_restart_attempts;
        let probe_method = config.health_probe_method.clone();

        let connections = pool.lock().await.connections().to_vec();
        for connection in connections {
            match connection.status() {
                ConnectionStatus::Stopped => continue,
                ConnectionStatus::Error if connection.restart_count() >= max_restarts => {
                    debug!(
                        "Connection {} for {:?} is in terminal error, not probing",
                        connection.id, language
                    );
                    continue;
                }
                _ => {}
            }

            match self.inner.health.probe(&connection, &probe_method).await {
                Ok(elapsed) => {
                    connection.mark_running();
                    self.inner.health.record_success(language, elapsed);
                }
                Err(reason) => {
                    warn!(
                        "Health check failed for {:?} connection {}: {}",
                        language, connection.id, reason
                    );
                    connection.mark_error(reason.clone());
                    self.inner.health.record_failure(language, &reason);
                    self.inner.events.publish(SupervisorEvent::HealthCheckFailed {
                        language,
                        connection_id: connection.id,
                        reason,
                    });

                    match restart_decision(connection.restart_count(), max_restarts) {
                        RestartDecision::Restart { attempt } => {
                            self.restart_connection(language, &pool, &connection, attempt)
                                .await;
                        }
                        RestartDecision::GiveUp => {
                            warn!(
                                "Backend for {:?} reached restart limit ({}), leaving it in error",
                                language, max_restarts
                            );
                            self.inner.events.publish(SupervisorEvent::RestartLimitReached {
                                language,
                                connection_id: connection.id,
                                restart_count: connection.restart_count(),
                            });
                        }
                    }
                }
            }
        }
    }

    async fn restart_connection(
        &self,
        language: Language,
        pool: &Arc<Mutex<ConnectionPool>>,
        failed: &Arc<BackendConnection>,
        attempt: u32,
    ) {
        let mut pool = pool.lock().await;
        if pool.get(failed.id).is_none() {
            return;
        }

        info!(
            "Restarting backend for {:?} (attempt {}) connection {}",
            language, attempt, failed.id
        );
        if let Err(e) = failed.transport().shutdown().await {
            debug!("Error stopping failed backend: {}", e);
        }
        self.forget_documents_on(failed.id);

        match self.spawn_connection(language, failed.id, attempt).await {
            Ok(replacement) => {
                pool.replace(replacement);
                self.inner.events.publish(SupervisorEvent::ServerRecovered {
                    language,
                    connection_id: failed.id,
                    restart_count: attempt,
                });
            }
            Err(e) => {
                warn!("Restart of {:?} backend failed: {}", language, e);
                failed.record_failed_restart(attempt, e.to_string());
            }
        }
    }

    // --- shutdown ---

    pub async fn shutdown_server(&self, language: Language) {
        if let Some((_, task)) = self.inner.health_tasks.remove(&language) {
            task.abort();
        }

        let connections = match self.inner.pools.remove(&language) {
            Some((_, pool)) => pool.lock().await.drain(),
            None => Vec::new(),
        };
        let had_connections = !connections.is_empty();
        for connection in connections {
            connection.close().await;
        }

        self.inner.metrics.remove(&language);
        self.inner.health.remove(language);
        self.inner.documents.retain(|_, doc| doc.language != language);
        self.inner.batch_queue.remove_language(language);
        self.inner.incremental_queue.remove_language(language);
        self.inner.cache.invalidate_language(language);

        if had_connections {
            info!("Backend for {:?} shut down", language);
            self.inner
                .events
                .publish(SupervisorEvent::ServerStopped { language });
        }
    }

    pub async fn shutdown_all(&self) {
        let languages: Vec<Language> = self.inner.pools.iter().map(|e| *e.key()).collect();
        join_all(languages.into_iter().map(|l| self.shutdown_server(l))).await;

        if let Ok(mut tasks) = self.inner.background_tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }

    // --- status ---

    pub async fn get_server_status(&self, language: Language) -> Option<ServerStatusReport> {
        let pool = self.inner.pools.get(&language).map(|p| p.value().clone())?;
        let pool = pool.lock().await;
        if pool.is_empty() {
            return None;
        }

        let active = pool.active();
        let active_id = active.as_ref().map(|c| c.id);
        let status = active
            .as_ref()
            .or_else(|| pool.connections().first())
            .map(|c| c.status())
            .unwrap_or(ConnectionStatus::Stopped);

        let connections = pool
            .connections()
            .iter()
            .map(|c| ConnectionReport {
                id: c.id,
                status: c.status(),
                restart_count: c.restart_count(),
                pid: c.transport().pid(),
                uptime_secs: c.uptime().as_secs(),
                heartbeat_age_ms: c.last_heartbeat().elapsed().as_millis() as u64,
                last_error: c.last_error(),
                active: Some(c.id) == active_id,
            })
            .collect();

        Some(ServerStatusReport {
            language,
            server_id: pool
                .connections()
                .first()
                .map(|c| c.server_id.clone())
                .unwrap_or_default(),
            status,
            pool_size: pool.len(),
            max_pool_size: pool.max_size(),
            connections,
            health: self.inner.health.get(language).map(|h| h.report()),
        })
    }

    pub fn get_server_metrics(&self, language: Language) -> Option<BackendMetrics> {
        self.inner.metrics.get(&language).map(|m| m.value().clone())
    }

    /// Informational only; returns this sample's reduction in `[0, 1]`.
    pub fn record_token_reduction(
        &self,
        language: Language,
        raw_chars: usize,
        symbol_count: usize,
    ) -> f64 {
        self.with_metrics(language, |m| m.record_token_reduction(raw_chars, symbol_count))
    }

    pub fn active_languages(&self) -> Vec<Language> {
        let mut languages: Vec<Language> = self.inner.pools.iter().map(|e| *e.key()).collect();
        languages.sort();
        languages
    }

    // --- background loops ---

    /// Spawn the batch, incremental and cache-purge loops. Calling this
    /// more than once is a no-op.
    pub fn start_background_tasks(&self) {
        let Ok(mut tasks) = self.inner.background_tasks.lock() else {
            return;
        };
        if !tasks.is_empty() {
            return;
        }

        let config = &self.inner.config;
        tasks.push(self.spawn_periodic(config.batch_interval(), |s| async move {
            s.process_batch_tick().await;
        }));
        tasks.push(self.spawn_periodic(config.incremental_interval(), |s| async move {
            s.process_incremental_tick().await;
        }));
        tasks.push(self.spawn_periodic(config.cache_purge_interval(), |s| async move {
            let purged = s.inner.cache.purge_expired();
            if purged > 0 {
                debug!("Purged {} expired cache entries", purged);
            }
        }));
        info!("Supervisor background tasks started");
    }

    fn spawn_periodic<F, Fut>(&self, period: Duration, work: F) -> JoinHandle<()>
    where
        F: Fn(BackendSupervisor) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(supervisor) = Self::from_weak(&weak) else {
                    break;
                };
                work(supervisor).await;
            }
        })
    }
}
