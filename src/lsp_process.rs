use crate::backend_registry::{normalize_executable, BackendConfig};
use crate::transport::{BackendLauncher, BackendTransport, TransportError};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

type PendingMap = DashMap<i64, oneshot::Sender<Value>>;

/// A backend process speaking JSON-RPC with `Content-Length` framing over stdio.
///
/// A single reader task owns stdout and routes responses to waiting callers by
/// request id, so several requests can be in flight on one process.
pub struct LspProcess {
    child: Arc<Mutex<Option<Child>>>,
    stdin: Arc<Mutex<ChildStdin>>,
    pending: Arc<PendingMap>,
    next_id: AtomicI64,
    alive: Arc<AtomicBool>,
    reader_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    stderr_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    server_name: String,
    pid: Option<u32>,
}

impl std::fmt::Debug for LspProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LspProcess")
            .field("server_name", &self.server_name)
            .field("pid", &self.pid)
            .field("alive", &self.alive.load(Ordering::Relaxed))
            .finish()
    }
}

impl LspProcess {
    pub fn spawn(config: &BackendConfig, workspace_root: Option<&Path>) -> Result<Self> {
        let command = normalize_executable(&config.command);
        info!(
            "Spawning backend for {:?}: {} {}",
            config.language,
            command,
            config.args.join(" ")
        );

        let mut builder = tokio::process::Command::new(&command);
        if let Some(workspace) = workspace_root {
            builder.current_dir(workspace);
        }

        let mut child = builder
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn {}", command))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("Failed to get stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("Failed to get stdout"))?;
        let pid = child.id();

        let stdin = Arc::new(Mutex::new(stdin));
        let pending: Arc<PendingMap> = Arc::new(DashMap::new());
        let alive = Arc::new(AtomicBool::new(true));

        let reader_task = tokio::spawn(Self::read_loop(
            BufReader::new(stdout),
            stdin.clone(),
            pending.clone(),
            alive.clone(),
        ));

        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => tracing::warn!(target: "backend_stderr", "{}", line),
                        Ok(None) => break,
                        Err(e) => {
                            tracing::error!(target: "backend_stderr", "Error reading stderr: {}", e);
                            break;
                        }
                    }
                }
                tracing::debug!(target: "backend_stderr", "Stderr reader terminated");
            })
        });

        Ok(Self {
            child: Arc::new(Mutex::new(Some(child))),
            stdin,
            pending,
            next_id: AtomicI64::new(1),
            alive,
            reader_task: std::sync::Mutex::new(Some(reader_task)),
            stderr_task: std::sync::Mutex::new(stderr_task),
            server_name: config.server_id.clone(),
            pid,
        })
    }

    async fn read_loop(
        mut stdout: BufReader<ChildStdout>,
        stdin: Arc<Mutex<ChildStdin>>,
        pending: Arc<PendingMap>,
        alive: Arc<AtomicBool>,
    ) {
        loop {
            let msg = match read_message(&mut stdout).await {
                Ok(msg) => msg,
                Err(e) => {
                    debug!("Backend stream closed: {}", e);
                    break;
                }
            };

            let id = msg.get("id").cloned();
            let method = msg.get("method").and_then(|m| m.as_str()).map(str::to_string);

            match (id, method) {
                // Request from the server: must be answered or some servers stall.
                (Some(id), Some(method)) => {
                    let reply = server_request_reply(&method, &msg, id);
                    if let Err(e) = write_message(&stdin, &reply).await {
                        warn!("Failed to answer server request {}: {}", method, e);
                    }
                }
                (Some(id), None) => match id.as_i64() {
                    Some(id) => {
                        if let Some((_, sender)) = pending.remove(&id) {
                            let _ = sender.send(msg);
                        } else {
                            debug!("Dropping response for unknown request id {}", id);
                        }
                    }
                    None => debug!("Ignoring response with non-numeric id: {:?}", id),
                },
                (None, Some(method)) => {
                    debug!(target: "codemux_protocol", "Notification from backend: {}", method);
                }
                (None, None) => warn!("Malformed message from backend: {}", msg),
            }
        }

        alive.store(false, Ordering::Release);
        // Dropping the senders wakes every waiter with a closed-channel error.
        pending.clear();
    }

    fn abort_tasks(&self) {
        for slot in [&self.reader_task, &self.stderr_task] {
            if let Ok(mut guard) = slot.lock() {
                if let Some(handle) = guard.take() {
                    handle.abort();
                }
            }
        }
    }
}

fn server_request_reply(method: &str, msg: &Value, id: Value) -> Value {
    match method {
        "workspace/configuration" => {
            let items = msg
                .get("params")
                .and_then(|p| p.get("items"))
                .and_then(|i| i.as_array())
                .map(|items| items.len())
                .unwrap_or(1);
            let configs: Vec<Value> = (0..items).map(|_| json!({})).collect();
            json!({ "jsonrpc": "2.0", "id": id, "result": configs })
        }
        "window/workDoneProgress/create"
        | "client/registerCapability"
        | "client/unregisterCapability"
        | "workspace/workspaceFolders" => {
            json!({ "jsonrpc": "2.0", "id": id, "result": null })
        }
        _ => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": -32601, "message": format!("Method not found: {}", method) }
        }),
    }
}

async fn write_message(stdin: &Mutex<ChildStdin>, msg: &Value) -> Result<()> {
    let body = msg.to_string();
    let frame = format!("Content-Length: {}\r\n\r\n{}", body.len(), body);
    tracing::trace!(target: "codemux_protocol", ">>> {}", body);

    let mut stdin = stdin.lock().await;
    stdin.write_all(frame.as_bytes()).await?;
    stdin.flush().await?;
    Ok(())
}

async fn read_message<R>(reader: &mut R) -> Result<Value>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;

    loop {
        let mut header = String::new();
        let bytes_read = reader.read_line(&mut header).await?;
        if bytes_read == 0 {
            return Err(anyhow!("Backend closed connection"));
        }

        let line = header.trim_end();
        if line.is_empty() {
            break;
        }

        if let Some(value) = line.strip_prefix("Content-Length:") {
            content_length = Some(value.trim().parse().context("Invalid Content-Length")?);
        }
    }

    let len = content_length.ok_or_else(|| anyhow!("Missing Content-Length header"))?;
    if len > MAX_MESSAGE_SIZE {
        return Err(anyhow!(
            "Content-Length {} exceeds limit of {} bytes",
            len,
            MAX_MESSAGE_SIZE
        ));
    }
    let mut body = vec![0; len];
    reader.read_exact(&mut body).await?;

    let msg: Value = serde_json::from_slice(&body)?;
    tracing::trace!(target: "codemux_protocol", "<<< {}", msg);
    Ok(msg)
}

#[async_trait]
impl BackendTransport for LspProcess {
    async fn request(
        &self,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> std::result::Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        self.pending.insert(id, sender);

        let msg = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        if let Err(e) = write_message(&self.stdin, &msg).await {
            self.pending.remove(&id);
            return Err(TransportError::Io(e.to_string()));
        }

        match timeout(deadline, receiver).await {
            Ok(Ok(response)) => {
                if let Some(error) = response.get("error") {
                    return Err(TransportError::Response {
                        code: error.get("code").and_then(|c| c.as_i64()).unwrap_or(-32603),
                        message: error
                            .get("message")
                            .and_then(|m| m.as_str())
                            .unwrap_or("unknown error")
                            .to_string(),
                    });
                }
                Ok(response.get("result").cloned().unwrap_or(Value::Null))
            }
            Ok(Err(_)) => Err(TransportError::Io("backend connection closed".to_string())),
            Err(_) => {
                self.pending.remove(&id);
                let _ = self.notify("$/cancelRequest", json!({ "id": id })).await;
                Err(TransportError::Timeout)
            }
        }
    }

    async fn notify(&self, method: &str, params: Value) -> std::result::Result<(), TransportError> {
        let msg = json!({ "jsonrpc": "2.0", "method": method, "params": params });
        write_message(&self.stdin, &msg)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn shutdown(&self) -> Result<()> {
        debug!("Shutting down backend {}", self.server_name);

        let result = timeout(SHUTDOWN_TIMEOUT, async {
            if self.is_alive() {
                match self
                    .request("shutdown", Value::Null, Duration::from_secs(1))
                    .await
                {
                    Ok(_) => debug!("Backend {} acknowledged shutdown", self.server_name),
                    Err(e) => warn!("Shutdown request to {} failed (continuing): {}", self.server_name, e),
                }
                if let Err(e) = self.notify("exit", Value::Null).await {
                    debug!("Failed to send exit to {}: {}", self.server_name, e);
                }
            }

            let mut child_opt = self.child.lock().await;
            if let Some(child) = child_opt.as_mut() {
                let deadline = tokio::time::Instant::now() + Duration::from_millis(500);
                loop {
                    match child.try_wait() {
                        Ok(Some(status)) => {
                            debug!("Backend {} exited with {}", self.server_name, status);
                            break;
                        }
                        Ok(None) if tokio::time::Instant::now() < deadline => {
                            tokio::time::sleep(Duration::from_millis(50)).await;
                        }
                        Ok(None) => {
                            warn!("Backend {} did not exit gracefully, force killing", self.server_name);
                            child.kill().await.context("Failed to kill backend process")?;
                            break;
                        }
                        Err(e) => return Err(anyhow!("Error checking backend status: {}", e)),
                    }
                }
            }
            *child_opt = None;
            Ok::<(), anyhow::Error>(())
        })
        .await;

        self.alive.store(false, Ordering::Release);
        self.abort_tasks();

        match result {
            Ok(inner) => inner,
            Err(_) => Err(anyhow!(
                "Backend shutdown timed out after {} seconds",
                SHUTDOWN_TIMEOUT.as_secs()
            )),
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }
}

impl Drop for LspProcess {
    fn drop(&mut self) {
        // The child itself is killed on drop via `kill_on_drop`.
        self.abort_tasks();
    }
}

/// Launches real backend processes from registry configuration.
#[derive(Debug, Default, Clone)]
pub struct ProcessLauncher;

#[async_trait]
impl BackendLauncher for ProcessLauncher {
    async fn launch(
        &self,
        config: &BackendConfig,
        workspace_root: Option<&Path>,
    ) -> Result<Arc<dyn BackendTransport>> {
        let process = LspProcess::spawn(config, workspace_root)?;
        Ok(Arc::new(process))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_message_handles_extra_headers() {
        let body = r#"{"jsonrpc":"2.0","id":7,"result":{"ok":true}}"#;
        let frame = format!(
            "Content-Length: {}\r\nContent-Type: application/vscode-jsonrpc; charset=utf-8\r\n\r\n{}",
            body.len(),
            body
        );
        let mut reader = BufReader::new(frame.as_bytes());
        let msg = read_message(&mut reader).await.unwrap();
        assert_eq!(msg["id"], 7);
        assert_eq!(msg["result"]["ok"], true);
    }

    #[tokio::test]
    async fn test_read_message_rejects_missing_length() {
        let mut reader = BufReader::new("X-Other: 1\r\n\r\n{}".as_bytes());
        assert!(read_message(&mut reader).await.is_err());
    }

    #[tokio::test]
    async fn test_read_message_rejects_oversized_length() {
        let frame = format!("Content-Length: {}\r\n\r\n{{}}", usize::MAX);
        let mut reader = BufReader::new(frame.as_bytes());
        let err = read_message(&mut reader).await.unwrap_err();
        assert!(err.to_string().contains("exceeds limit"));
    }

    #[test]
    fn test_server_request_replies() {
        let msg = json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "workspace/configuration",
            "params": { "items": [{}, {}] }
        });
        let reply = server_request_reply("workspace/configuration", &msg, json!(3));
        assert_eq!(reply["result"].as_array().map(|a| a.len()), Some(2));

        let reply = server_request_reply("custom/thing", &msg, json!(4));
        assert_eq!(reply["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn test_spawn_missing_binary_fails() {
        let config = BackendConfig::new(
            crate::language_detector::Language::Rust,
            "missing",
            "definitely-not-a-real-backend-binary",
            &[],
        );
        assert!(LspProcess::spawn(&config, None).is_err());
    }
}
