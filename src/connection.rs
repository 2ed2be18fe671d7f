use crate::backend_registry::BackendConfig;
use crate::language_detector::Language;
use crate::transport::BackendTransport;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

/// Connection lifecycle.
///
/// `Starting -> Running`, `Running -> Error` on a failed probe,
/// `Error -> Running` after a successful restart, `Running | Error -> Stopped`
/// on explicit shutdown. A connection is only handed out once it is `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Starting,
    Running,
    Error,
    Stopped,
}

#[derive(Debug, Clone)]
struct ConnectionState {
    status: ConnectionStatus,
    restart_count: u32,
    last_heartbeat: Instant,
    last_error: Option<String>,
}

/// A managed handle to one running backend process.
pub struct BackendConnection {
    pub id: Uuid,
    pub language: Language,
    pub server_id: String,
    pub workspace_root: Option<PathBuf>,
    transport: Arc<dyn BackendTransport>,
    server_capabilities: Value,
    started_at: Instant,
    state: Mutex<ConnectionState>,
}

impl std::fmt::Debug for BackendConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConnection")
            .field("id", &self.id)
            .field("language", &self.language)
            .field("server_id", &self.server_id)
            .field("status", &self.status())
            .field("restart_count", &self.restart_count())
            .finish()
    }
}

impl BackendConnection {
    pub(crate) fn new(
        id: Uuid,
        config: &BackendConfig,
        workspace_root: Option<PathBuf>,
        transport: Arc<dyn BackendTransport>,
        server_capabilities: Value,
        restart_count: u32,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            language: config.language,
            server_id: config.server_id.clone(),
            workspace_root,
            transport,
            server_capabilities,
            started_at: now,
            state: Mutex::new(ConnectionState {
                status: ConnectionStatus::Running,
                restart_count,
                last_heartbeat: now,
                last_error: None,
            }),
        }
    }

    pub fn transport(&self) -> &Arc<dyn BackendTransport> {
        &self.transport
    }

    /// The `capabilities` object the backend returned from `initialize`.
    pub fn server_capabilities(&self) -> &Value {
        &self.server_capabilities
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut ConnectionState) -> T) -> T {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    pub fn status(&self) -> ConnectionStatus {
        self.with_state(|s| s.status)
    }

    pub fn restart_count(&self) -> u32 {
        self.with_state(|s| s.restart_count)
    }

    pub fn last_heartbeat(&self) -> Instant {
        self.with_state(|s| s.last_heartbeat)
    }

    pub fn last_error(&self) -> Option<String> {
        self.with_state(|s| s.last_error.clone())
    }

    /// Running and the process has not gone away underneath us.
    pub fn is_healthy(&self) -> bool {
        self.status() == ConnectionStatus::Running && self.transport.is_alive()
    }

    pub fn touch(&self) {
        self.with_state(|s| s.last_heartbeat = Instant::now());
    }

    pub(crate) fn mark_running(&self) {
        self.with_state(|s| {
            s.status = ConnectionStatus::Running;
            s.last_heartbeat = Instant::now();
            s.last_error = None;
        });
    }

    pub(crate) fn mark_error(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.with_state(|s| {
            // Stopped is terminal.
            if s.status != ConnectionStatus::Stopped {
                s.status = ConnectionStatus::Error;
            }
            s.last_error = Some(reason);
        });
    }

    /// A restart attempt that did not produce a replacement still counts.
    pub(crate) fn record_failed_restart(&self, attempt: u32, reason: impl Into<String>) {
        let reason = reason.into();
        self.with_state(|s| {
            s.restart_count = s.restart_count.max(attempt);
            s.status = ConnectionStatus::Error;
            s.last_error = Some(reason);
        });
    }

    pub(crate) fn mark_stopped(&self) {
        self.with_state(|s| s.status = ConnectionStatus::Stopped);
    }

    pub(crate) async fn close(&self) {
        self.mark_stopped();
        if let Err(e) = self.transport.shutdown().await {
            debug!("Error shutting down {} ({}): {}", self.server_id, self.id, e);
        }
    }
}

/// Send `initialize`, wait for the reply, then send `initialized`.
/// Returns the backend's declared server capabilities.
pub(crate) async fn perform_handshake(
    transport: &dyn BackendTransport,
    config: &BackendConfig,
    workspace_root: Option<&Path>,
) -> Result<Value> {
    let root = workspace_root.and_then(|root| {
        let absolute = if root.is_absolute() {
            root.to_path_buf()
        } else {
            std::env::current_dir().ok()?.join(root)
        };
        Url::from_file_path(&absolute).ok().map(|uri| (absolute, uri))
    });

    let (root_uri, folders) = match &root {
        Some((path, uri)) => (
            Value::String(uri.to_string()),
            json!([{
                "uri": uri.to_string(),
                "name": path.file_name().and_then(|n| n.to_str()).unwrap_or("workspace")
            }]),
        ),
        None => (Value::Null, Value::Null),
    };

    let init_params = json!({
        "processId": std::process::id(),
        "rootUri": root_uri,
        "workspaceFolders": folders,
        "capabilities": {
            "textDocument": {
                "synchronization": { "didSave": false, "dynamicRegistration": false },
                "documentSymbol": { "hierarchicalDocumentSymbolSupport": true },
                "definition": { "dynamicRegistration": false },
                "typeDefinition": { "dynamicRegistration": false },
                "implementation": { "dynamicRegistration": false },
                "references": { "dynamicRegistration": false },
                "hover": { "dynamicRegistration": false, "contentFormat": ["markdown", "plaintext"] },
                "completion": {
                    "dynamicRegistration": false,
                    "completionItem": { "snippetSupport": false }
                }
            },
            "workspace": {
                "configuration": true,
                "workspaceFolders": true,
                "symbol": { "dynamicRegistration": false }
            },
            "window": { "workDoneProgress": true }
        },
        "initializationOptions": config.initialization_options
    });

    debug!(
        "Initializing {} with timeout {}s",
        config.server_id, config.initialization_timeout_secs
    );
    let response = transport
        .request("initialize", init_params, config.initialization_timeout())
        .await
        .map_err(|e| anyhow!("initialize failed: {}", e))?;

    transport
        .notify("initialized", json!({}))
        .await
        .map_err(|e| anyhow!("initialized notification failed: {}", e))?;

    info!(
        "Backend {} initialized for {:?}",
        config.server_id, config.language
    );
    Ok(response.get("capabilities").cloned().unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct StubTransport {
        alive: AtomicBool,
    }

    #[async_trait]
    impl BackendTransport for StubTransport {
        async fn request(
            &self,
            _method: &str,
            _params: Value,
            _timeout: Duration,
        ) -> std::result::Result<Value, TransportError> {
            Ok(json!({ "capabilities": { "hoverProvider": true } }))
        }

        async fn notify(&self, _method: &str, _params: Value) -> std::result::Result<(), TransportError> {
            Ok(())
        }

        async fn shutdown(&self) -> Result<()> {
            self.alive.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn is_alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }
    }

    fn stub_connection() -> BackendConnection {
        let config = BackendConfig::new(Language::Rust, "stub", "stub", &[]);
        let transport = Arc::new(StubTransport {
            alive: AtomicBool::new(true),
        });
        BackendConnection::new(Uuid::new_v4(), &config, None, transport, Value::Null, 0)
    }

    #[test]
    fn test_state_transitions() {
        let conn = stub_connection();
        assert_eq!(conn.status(), ConnectionStatus::Running);
        assert!(conn.is_healthy());

        conn.mark_error("probe failed");
        assert_eq!(conn.status(), ConnectionStatus::Error);
        assert_eq!(conn.last_error().as_deref(), Some("probe failed"));
        assert!(!conn.is_healthy());

        conn.mark_running();
        assert!(conn.is_healthy());

        conn.mark_stopped();
        conn.mark_error("late failure");
        assert_eq!(conn.status(), ConnectionStatus::Stopped);
    }

    #[tokio::test]
    async fn test_handshake_returns_capabilities_and_close_stops() {
        let config = BackendConfig::new(Language::Rust, "stub", "stub", &[]);
        let transport = StubTransport {
            alive: AtomicBool::new(true),
        };
        let caps = perform_handshake(&transport, &config, Some(Path::new("/tmp")))
            .await
            .unwrap();
        assert_eq!(caps["hoverProvider"], true);

        let conn = stub_connection();
        conn.close().await;
        assert_eq!(conn.status(), ConnectionStatus::Stopped);
        assert!(!conn.transport().is_alive());
    }
}
