//! `CodeIntelligence` ties the supervisor, the symbol index and the analyzer
//! together and is the surface a tool-dispatch layer calls into.

use crate::analysis::{AnalysisContext, AnalysisResult, SemanticAnalyzer};
use crate::backend_registry::BackendRegistry;
use crate::config::Config;
use crate::error::Result;
use crate::events::SupervisorEvent;
use crate::index::{FileChange, IndexResult, IndexSnapshot, SymbolIndex, SymbolMatch, SymbolQuery, UpdateResult};
use crate::language_detector::Language;
use crate::lsp_process::ProcessLauncher;
use crate::metrics::BackendMetrics;
use crate::supervisor::{BackendSupervisor, ServerStatusReport};
use crate::transport::BackendLauncher;
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct CodeIntelligence {
    config: Config,
    supervisor: BackendSupervisor,
    index: Arc<SymbolIndex>,
    analyzer: Arc<SemanticAnalyzer>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl CodeIntelligence {
    pub fn new(config: Config, registry: BackendRegistry, launcher: Arc<dyn BackendLauncher>) -> Self {
        let supervisor = BackendSupervisor::new(config.supervisor.clone(), registry, launcher);
        let index = Arc::new(SymbolIndex::new(supervisor.clone(), config.index.clone()));
        let analyzer = Arc::new(SemanticAnalyzer::new(
            supervisor.clone(),
            index.clone(),
            config.analyzer.clone(),
        ));
        Self {
            config,
            supervisor,
            index,
            analyzer,
            listener: Mutex::new(None),
        }
    }

    /// Real backend processes from the built-in registry plus user overrides.
    pub fn with_process_launcher(config: Config) -> Self {
        Self::new(config, BackendRegistry::new(), Arc::new(ProcessLauncher))
    }

    /// Start the supervisor's periodic tasks and the invalidation listener.
    /// Must be called from within a tokio runtime; repeated calls are no-ops.
    pub fn start(&self) {
        self.supervisor.start_background_tasks();

        let Ok(mut listener) = self.listener.lock() else {
            return;
        };
        if listener.is_some() {
            return;
        }
        let events = self.supervisor.subscribe();
        let analyzer = Arc::downgrade(&self.analyzer);
        *listener = Some(tokio::spawn(invalidation_listener(events, analyzer)));
        info!("Code intelligence engine started");
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn supervisor(&self) -> &BackendSupervisor {
        &self.supervisor
    }

    pub fn index(&self) -> &Arc<SymbolIndex> {
        &self.index
    }

    pub fn analyzer(&self) -> &Arc<SemanticAnalyzer> {
        &self.analyzer
    }

    pub async fn request(&self, language: Language, method: &str, params: Value) -> Result<Value> {
        self.supervisor.request(language, method, params).await
    }

    pub async fn index_project(&self, root: &Path) -> Result<IndexResult> {
        self.index.index_project(root).await
    }

    pub async fn find_symbols(&self, query: &SymbolQuery) -> Result<Vec<SymbolMatch>> {
        self.index.find_symbols(query).await
    }

    pub async fn analyze_code(&self, context: &AnalysisContext) -> Result<AnalysisResult> {
        self.analyzer.analyze_code(context).await
    }

    pub async fn get_server_status(&self, language: Language) -> Option<ServerStatusReport> {
        self.supervisor.get_server_status(language).await
    }

    pub fn get_server_metrics(&self, language: Language) -> Option<BackendMetrics> {
        self.supervisor.get_server_metrics(language)
    }

    /// Apply file changes everywhere state depends on file content: cached
    /// backend responses, cached analyses, then the index itself.
    pub async fn handle_file_changes(&self, changes: &[FileChange]) -> Result<UpdateResult> {
        for change in changes {
            let dropped = self.supervisor.invalidate_semantic_cache(&change.uri);
            self.analyzer.invalidate(&change.uri);
            debug!(
                "File {} {:?}: dropped {} cached response(s)",
                change.uri, change.change_type, dropped
            );
        }
        self.index.update_index(changes).await
    }

    pub async fn export_index(&self) -> IndexSnapshot {
        self.index.get_full_index().await
    }

    pub async fn import_index(&self, snapshot: IndexSnapshot) -> Result<()> {
        self.index.restore_index(snapshot).await?;
        self.analyzer.invalidate_all();
        Ok(())
    }

    pub async fn shutdown(&self) {
        if let Ok(mut listener) = self.listener.lock() {
            if let Some(handle) = listener.take() {
                handle.abort();
            }
        }
        self.supervisor.shutdown_all().await;
        info!("Code intelligence engine stopped");
    }
}

impl Drop for CodeIntelligence {
    fn drop(&mut self) {
        if let Ok(mut listener) = self.listener.lock() {
            if let Some(handle) = listener.take() {
                handle.abort();
            }
        }
    }
}

async fn invalidation_listener(
    mut events: tokio::sync::broadcast::Receiver<SupervisorEvent>,
    analyzer: Weak<SemanticAnalyzer>,
) {
    loop {
        let event = events.recv().await;
        let Some(analyzer) = analyzer.upgrade() else {
            break;
        };
        match event {
            Ok(SupervisorEvent::DocumentChanged { uri, .. }) => analyzer.invalidate(&uri),
            Ok(SupervisorEvent::ServerStopped { .. } | SupervisorEvent::ServerRecovered { .. }) => {
                analyzer.invalidate_all()
            }
            Ok(_) => {}
            Err(RecvError::Lagged(missed)) => {
                warn!("Invalidation listener missed {} event(s); dropping all analyses", missed);
                analyzer.invalidate_all();
            }
            Err(RecvError::Closed) => break,
        }
    }
}
