//! Scripted in-process backend for integration tests.
//!
//! Documents use a tiny outline format instead of a real language:
//!
//! ```text
//! class UserService
//!     fn getUser -> User
//!         call loadRow
//! fn loadRow
//! ```
//!
//! `class`/`struct`/`fn` lines declare symbols (indented `fn` lines are
//! methods), a declaration spans the following more-indented lines, and
//! `call NAME` lines are references to `NAME`.

#![allow(dead_code)]

use anyhow::anyhow;
use async_trait::async_trait;
use codemux::config::Config;
use codemux::{
    BackendConfig, BackendLauncher, BackendRegistry, BackendSupervisor, BackendTransport,
    CodeIntelligence, TransportError,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Canned answer for one method, overriding the outline-driven default.
#[derive(Debug, Clone)]
pub enum MockResponse {
    Success(Value),
    Error { code: i64, message: String },
    Timeout,
}

#[derive(Default)]
pub struct MockState {
    calls: Mutex<HashMap<String, usize>>,
    patterns: Mutex<HashMap<String, MockResponse>>,
    documents: Mutex<HashMap<String, String>>,
    transports: Mutex<Vec<Arc<MockTransport>>>,
    pub launches: AtomicUsize,
    pub fail_launches: AtomicBool,
    pub fail_probes: AtomicBool,
}

impl MockState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(method)
            .copied()
            .unwrap_or(0)
    }

    pub fn respond(&self, method: &str, response: MockResponse) {
        self.patterns
            .lock()
            .unwrap()
            .insert(method.to_string(), response);
    }

    pub fn clear_response(&self, method: &str) {
        self.patterns.lock().unwrap().remove(method);
    }

    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Make every transport launched so far report itself dead.
    pub fn kill_all(&self) {
        for transport in self.transports.lock().unwrap().iter() {
            transport.alive.store(false, Ordering::SeqCst);
        }
    }

    pub fn kill_latest(&self) {
        if let Some(transport) = self.transports.lock().unwrap().last() {
            transport.alive.store(false, Ordering::SeqCst);
        }
    }

    fn record(&self, method: &str) {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_insert(0) += 1;
    }

    fn document(&self, uri: &str) -> Option<String> {
        if let Some(text) = self.documents.lock().unwrap().get(uri) {
            return Some(text.clone());
        }
        let path = url::Url::parse(uri).ok()?.to_file_path().ok()?;
        std::fs::read_to_string(path).ok()
    }

    fn all_documents(&self) -> Vec<(String, String)> {
        self.documents
            .lock()
            .unwrap()
            .iter()
            .map(|(uri, text)| (uri.clone(), text.clone()))
            .collect()
    }
}

pub struct MockTransport {
    state: Arc<MockState>,
    alive: AtomicBool,
}

#[async_trait]
impl BackendTransport for MockTransport {
    async fn request(
        &self,
        method: &str,
        params: Value,
        _timeout: Duration,
    ) -> Result<Value, TransportError> {
        self.state.record(method);
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::Io("stream closed".to_string()));
        }

        if method == "initialize" {
            return Ok(json!({ "capabilities": { "documentSymbolProvider": true } }));
        }
        if method == "workspace/symbol" && self.state.fail_probes.load(Ordering::SeqCst) {
            return Err(TransportError::Response {
                code: -32603,
                message: "probe failed".to_string(),
            });
        }

        let pattern = self.state.patterns.lock().unwrap().get(method).cloned();
        match pattern {
            Some(MockResponse::Success(value)) => return Ok(value),
            Some(MockResponse::Error { code, message }) => {
                return Err(TransportError::Response { code, message })
            }
            Some(MockResponse::Timeout) => return Err(TransportError::Timeout),
            None => {}
        }

        let uri = params["textDocument"]["uri"].as_str().unwrap_or_default();
        let position = (
            params["position"]["line"].as_u64().unwrap_or(0) as usize,
            params["position"]["character"].as_u64().unwrap_or(0) as usize,
        );
        Ok(match method {
            "textDocument/documentSymbol" => self
                .state
                .document(uri)
                .map(|text| document_symbols(&text))
                .unwrap_or(Value::Null),
            "textDocument/references" => self.references(uri, position),
            "textDocument/definition" => self.definition(uri, position),
            "textDocument/hover" => match self.word_at(uri, position) {
                Some(word) => json!({ "contents": { "kind": "markdown", "value": format!("```\nfn {}\n```", word) } }),
                None => Value::Null,
            },
            "workspace/symbol" => json!([]),
            _ => Value::Null,
        })
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), TransportError> {
        self.state.record(method);
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::Io("stream closed".to_string()));
        }
        let uri = params["textDocument"]["uri"].as_str().map(str::to_string);
        let text = match method {
            "textDocument/didOpen" => params["textDocument"]["text"].as_str(),
            "textDocument/didChange" => params["contentChanges"][0]["text"].as_str(),
            _ => None,
        };
        if let (Some(uri), Some(text)) = (uri, text) {
            self.state
                .documents
                .lock()
                .unwrap()
                .insert(uri, text.to_string());
        }
        Ok(())
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

impl MockTransport {
    fn word_at(&self, uri: &str, (line, character): (usize, usize)) -> Option<String> {
        let text = self.state.document(uri)?;
        let line = text.lines().nth(line)?;
        let start = line[..character.min(line.len())]
            .rfind(|c: char| c.is_whitespace())
            .map(|i| i + 1)
            .unwrap_or(0);
        let word: String = line[start..]
            .chars()
            .take_while(|c| !c.is_whitespace())
            .collect();
        (!word.is_empty() && !matches!(word.as_str(), "fn" | "class" | "struct" | "call"))
            .then_some(word)
    }

    fn references(&self, uri: &str, position: (usize, usize)) -> Value {
        let Some(name) = self.word_at(uri, position) else {
            return json!([]);
        };
        let mut locations = Vec::new();
        for (doc_uri, text) in self.state.all_documents() {
            for (i, line) in text.lines().enumerate() {
                if line.trim() == format!("call {}", name) {
                    let col = line.find(&name).unwrap_or(0);
                    locations.push(location(&doc_uri, i, col, col + name.len()));
                }
            }
        }
        Value::Array(locations)
    }

    fn definition(&self, uri: &str, position: (usize, usize)) -> Value {
        let Some(name) = self.word_at(uri, position) else {
            return Value::Null;
        };
        for (doc_uri, text) in self.state.all_documents() {
            for decl in outline(&text) {
                if decl.name == name {
                    return json!([location(&doc_uri, decl.line, decl.col, decl.col + name.len())]);
                }
            }
        }
        Value::Null
    }
}

fn location(uri: &str, line: usize, start: usize, end: usize) -> Value {
    json!({
        "uri": uri,
        "range": {
            "start": { "line": line, "character": start },
            "end": { "line": line, "character": end }
        }
    })
}

struct Decl {
    name: String,
    kind: u64,
    line: usize,
    col: usize,
    indent: usize,
    end_line: usize,
    end_col: usize,
    detail: Option<String>,
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

fn outline(text: &str) -> Vec<Decl> {
    let lines: Vec<&str> = text.lines().collect();
    let mut decls = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        let indent = indent_of(line);
        let trimmed = line.trim();
        let (kind, rest) = if let Some(rest) = trimmed.strip_prefix("class ") {
            (5, rest)
        } else if let Some(rest) = trimmed.strip_prefix("struct ") {
            (23, rest)
        } else if let Some(rest) = trimmed.strip_prefix("fn ") {
            (if indent > 0 { 6 } else { 12 }, rest)
        } else {
            continue;
        };
        let Some(name) = rest.split_whitespace().next() else {
            continue;
        };
        let mut end = i;
        while end + 1 < lines.len()
            && !lines[end + 1].trim().is_empty()
            && indent_of(lines[end + 1]) > indent
        {
            end += 1;
        }
        decls.push(Decl {
            name: name.to_string(),
            kind,
            line: i,
            col: indent + (trimmed.len() - rest.len()),
            indent,
            end_line: end,
            end_col: lines[end].len(),
            detail: rest.split_once("->").map(|(_, t)| t.trim().to_string()),
        });
    }
    decls
}

fn symbol_json(decl: &Decl, children: Vec<Value>) -> Value {
    let mut symbol = json!({
        "name": decl.name,
        "kind": decl.kind,
        "range": {
            "start": { "line": decl.line, "character": decl.indent },
            "end": { "line": decl.end_line, "character": decl.end_col }
        },
        "selectionRange": {
            "start": { "line": decl.line, "character": decl.col },
            "end": { "line": decl.line, "character": decl.col + decl.name.len() }
        },
        "children": children,
    });
    if let Some(detail) = &decl.detail {
        symbol["detail"] = json!(detail);
    }
    symbol
}

/// Hierarchical `DocumentSymbol[]`: top-level declarations with their
/// indented members as children.
pub fn document_symbols(text: &str) -> Value {
    let decls = outline(text);
    let mut out = Vec::new();
    for top in decls.iter().filter(|d| d.indent == 0) {
        let children = decls
            .iter()
            .filter(|d| d.indent > 0 && d.line > top.line && d.line <= top.end_line)
            .map(|d| symbol_json(d, Vec::new()))
            .collect();
        out.push(symbol_json(top, children));
    }
    Value::Array(out)
}

pub struct MockLauncher {
    pub state: Arc<MockState>,
}

#[async_trait]
impl BackendLauncher for MockLauncher {
    async fn launch(
        &self,
        config: &BackendConfig,
        _workspace_root: Option<&Path>,
    ) -> anyhow::Result<Arc<dyn BackendTransport>> {
        self.state.launches.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_launches.load(Ordering::SeqCst) {
            return Err(anyhow!("cannot start {}", config.command));
        }
        let transport = Arc::new(MockTransport {
            state: self.state.clone(),
            alive: AtomicBool::new(true),
        });
        self.state.transports.lock().unwrap().push(transport.clone());
        Ok(transport)
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.index.concurrency = 4;
    config
}

pub fn supervisor(state: &Arc<MockState>, config: &Config) -> BackendSupervisor {
    BackendSupervisor::new(
        config.supervisor.clone(),
        BackendRegistry::builtin(),
        Arc::new(MockLauncher {
            state: state.clone(),
        }),
    )
}

pub fn engine(state: &Arc<MockState>, config: Config) -> CodeIntelligence {
    CodeIntelligence::new(
        config,
        BackendRegistry::builtin(),
        Arc::new(MockLauncher {
            state: state.clone(),
        }),
    )
}

pub fn write_file(root: &Path, name: &str, content: &str) -> PathBuf {
    let path = root.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
}

pub fn uri_of(path: &Path) -> String {
    url::Url::from_file_path(path).unwrap().to_string()
}
