//! Seam between the supervisor and whatever actually speaks to a backend.
//!
//! The production implementation is [`crate::lsp_process::LspProcess`], a child
//! process talking JSON-RPC over stdio. Tests plug in scripted transports.

use crate::backend_registry::BackendConfig;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of a request that reached the backend.
#[derive(Debug, Clone)]
pub enum TransportError {
    /// The backend answered with a JSON-RPC error object.
    Response { code: i64, message: String },
    /// No answer within the deadline.
    Timeout,
    /// Stream closed, write failed, malformed frame.
    Io(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Response { code, message } => {
                write!(f, "backend error {}: {}", code, message)
            }
            TransportError::Timeout => f.write_str("request timed out"),
            TransportError::Io(message) => write!(f, "transport failure: {}", message),
        }
    }
}

impl std::error::Error for TransportError {}

#[async_trait]
pub trait BackendTransport: Send + Sync {
    async fn request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> std::result::Result<Value, TransportError>;

    async fn notify(&self, method: &str, params: Value) -> std::result::Result<(), TransportError>;

    /// Graceful `shutdown` + `exit`, then force kill if the process is still alive.
    async fn shutdown(&self) -> Result<()>;

    /// Cheap local liveness check (no round-trip).
    fn is_alive(&self) -> bool;

    fn pid(&self) -> Option<u32> {
        None
    }
}

/// Creates transports. The supervisor performs the protocol handshake itself.
#[async_trait]
pub trait BackendLauncher: Send + Sync {
    async fn launch(
        &self,
        config: &BackendConfig,
        workspace_root: Option<&Path>,
    ) -> Result<Arc<dyn BackendTransport>>;
}
