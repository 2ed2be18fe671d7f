//! Static per-language backend configuration.

use crate::language_detector::Language;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Protocol features a backend declares up front. Requests for a method whose
/// capability is not declared are still forwarded; the set drives which
/// methods the supervisor considers safe to cache and probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    DocumentSymbol,
    WorkspaceSymbol,
    Definition,
    TypeDefinition,
    Implementation,
    References,
    Hover,
    Completion,
    IncrementalSync,
}

impl Capability {
    pub fn for_method(method: &str) -> Option<Capability> {
        let capability = match method {
            "textDocument/documentSymbol" => Capability::DocumentSymbol,
            "workspace/symbol" => Capability::WorkspaceSymbol,
            "textDocument/definition" => Capability::Definition,
            "textDocument/typeDefinition" => Capability::TypeDefinition,
            "textDocument/implementation" => Capability::Implementation,
            "textDocument/references" => Capability::References,
            "textDocument/hover" => Capability::Hover,
            "textDocument/completion" => Capability::Completion,
            "textDocument/didChange" => Capability::IncrementalSync,
            _ => return None,
        };
        Some(capability)
    }
}

fn standard_capabilities() -> BTreeSet<Capability> {
    BTreeSet::from([
        Capability::DocumentSymbol,
        Capability::WorkspaceSymbol,
        Capability::Definition,
        Capability::TypeDefinition,
        Capability::Implementation,
        Capability::References,
        Capability::Hover,
        Capability::Completion,
        Capability::IncrementalSync,
    ])
}

fn default_health_check_interval() -> u64 {
    30
}

fn default_max_restart_attempts() -> u32 {
    3
}

fn default_initialization_timeout() -> u64 {
    30
}

fn default_probe_method() -> String {
    "workspace/symbol".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub language: Language,
    pub server_id: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initialization_options: Option<Value>,
    #[serde(default = "standard_capabilities")]
    pub capabilities: BTreeSet<Capability>,
    #[serde(default)]
    pub root_markers: Vec<String>,
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_secs: u64,
    #[serde(default = "default_max_restart_attempts")]
    pub max_restart_attempts: u32,
    #[serde(default = "default_initialization_timeout")]
    pub initialization_timeout_secs: u64,
    /// Lightweight request used as the liveness probe.
    #[serde(default = "default_probe_method")]
    pub health_probe_method: String,
}

impl BackendConfig {
    pub fn new(language: Language, server_id: &str, command: &str, args: &[&str]) -> Self {
        Self {
            language,
            server_id: server_id.to_string(),
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            initialization_options: None,
            capabilities: standard_capabilities(),
            root_markers: Vec::new(),
            health_check_interval_secs: default_health_check_interval(),
            max_restart_attempts: default_max_restart_attempts(),
            initialization_timeout_secs: default_initialization_timeout(),
            health_probe_method: default_probe_method(),
        }
    }

    fn with_root_markers(mut self, markers: &[&str]) -> Self {
        self.root_markers = markers.iter().map(|m| m.to_string()).collect();
        self
    }

    fn with_initialization_options(mut self, options: Value) -> Self {
        self.initialization_options = Some(options);
        self
    }

    fn with_initialization_timeout(mut self, secs: u64) -> Self {
        self.initialization_timeout_secs = secs;
        self
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs.max(1))
    }

    pub fn initialization_timeout(&self) -> Duration {
        Duration::from_secs(self.initialization_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<Language, BackendConfig>,
}

impl BackendRegistry {
    /// Built-in backends merged with `$CONFIG_DIR/codemux/backends.toml`.
    pub fn new() -> Self {
        let mut registry = Self::builtin();
        match Self::load_user_config() {
            Ok(configs) => registry.merge_user_config(configs),
            Err(e) => tracing::debug!("No user backend configuration loaded: {}", e),
        }
        registry
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut registry = Self::empty();

        registry.register(
            BackendConfig::new(Language::Rust, "rust-analyzer", "rust-analyzer", &[])
                .with_root_markers(&["Cargo.toml"])
                .with_initialization_options(serde_json::json!({
                    "cargo": { "buildScripts": { "enable": true } },
                    "procMacro": { "enable": true },
                    "checkOnSave": { "enable": false }
                }))
                .with_initialization_timeout(60),
        );

        for language in [Language::TypeScript, Language::JavaScript] {
            registry.register(
                BackendConfig::new(
                    language,
                    "typescript-language-server",
                    "typescript-language-server",
                    &["--stdio"],
                )
                .with_root_markers(&["package.json", "tsconfig.json", "jsconfig.json"]),
            );
        }

        registry.register(
            BackendConfig::new(Language::Python, "pylsp", "pylsp", &[]).with_root_markers(&[
                "pyproject.toml",
                "setup.py",
                "requirements.txt",
            ]),
        );

        registry.register(
            BackendConfig::new(Language::Go, "gopls", "gopls", &["serve", "-mode=stdio"])
                .with_root_markers(&["go.mod", "go.work"])
                .with_initialization_options(serde_json::json!({
                    "expandWorkspaceToModule": true,
                    "symbolScope": "workspace"
                }))
                .with_initialization_timeout(60),
        );

        registry.register(
            BackendConfig::new(Language::Java, "jdtls", "jdtls", &[])
                .with_root_markers(&["pom.xml", "build.gradle", "build.gradle.kts"])
                .with_initialization_timeout(45),
        );

        for language in [Language::C, Language::Cpp] {
            registry.register(
                BackendConfig::new(language, "clangd", "clangd", &[]).with_root_markers(&[
                    "compile_commands.json",
                    ".clangd",
                    "CMakeLists.txt",
                    "Makefile",
                ]),
            );
        }

        registry.register(
            BackendConfig::new(
                Language::CSharp,
                "omnisharp",
                "omnisharp",
                &["--languageserver"],
            )
            .with_root_markers(&["*.sln", "*.csproj"])
            .with_initialization_timeout(45),
        );

        registry.register(
            BackendConfig::new(Language::Ruby, "solargraph", "solargraph", &["stdio"])
                .with_root_markers(&["Gemfile"]),
        );

        registry.register(
            BackendConfig::new(Language::Php, "intelephense", "intelephense", &["--stdio"])
                .with_root_markers(&["composer.json"]),
        );

        registry.register(
            BackendConfig::new(Language::Swift, "sourcekit-lsp", "sourcekit-lsp", &[])
                .with_root_markers(&["Package.swift"]),
        );

        registry.register(
            BackendConfig::new(
                Language::Kotlin,
                "kotlin-language-server",
                "kotlin-language-server",
                &[],
            )
            .with_root_markers(&["build.gradle.kts", "settings.gradle.kts"])
            .with_initialization_timeout(45),
        );

        registry
    }

    pub fn register(&mut self, config: BackendConfig) {
        self.backends.insert(config.language, config);
    }

    pub fn get(&self, language: Language) -> Option<&BackendConfig> {
        self.backends.get(&language)
    }

    pub fn languages(&self) -> Vec<Language> {
        let mut languages: Vec<Language> = self.backends.keys().copied().collect();
        languages.sort();
        languages
    }

    /// Walk up from `file_path` looking for the language's root markers.
    /// Falls back to the file's own directory.
    pub fn find_project_root(&self, file_path: &Path, language: Language) -> Option<PathBuf> {
        let config = self.get(language)?;
        let start = file_path.parent()?;

        for dir in start.ancestors() {
            for marker in &config.root_markers {
                if let Some(suffix) = marker.strip_prefix('*') {
                    let found = std::fs::read_dir(dir)
                        .map(|entries| {
                            entries.flatten().any(|entry| {
                                entry
                                    .file_name()
                                    .to_str()
                                    .map(|name| name.ends_with(suffix))
                                    .unwrap_or(false)
                            })
                        })
                        .unwrap_or(false);
                    if found {
                        return Some(dir.to_path_buf());
                    }
                } else if std::fs::symlink_metadata(dir.join(marker)).is_ok() {
                    return Some(dir.to_path_buf());
                }
            }
        }

        Some(start.to_path_buf())
    }

    fn load_user_config() -> Result<HashMap<Language, BackendConfig>> {
        let config_dir =
            dirs::config_dir().ok_or_else(|| anyhow!("Could not find config directory"))?;
        let config_path = config_dir.join("codemux").join("backends.toml");

        if !config_path.exists() {
            return Ok(HashMap::new());
        }

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {:?}", config_path))?;
        Self::parse_user_config(&content)
    }

    /// Parse `[languages.<name>]` tables into backend configurations.
    pub fn parse_user_config(content: &str) -> Result<HashMap<Language, BackendConfig>> {
        let config: toml::Value = toml::from_str(content).context("Invalid backends.toml")?;
        let mut backends = HashMap::new();

        if let Some(languages) = config.get("languages").and_then(|v| v.as_table()) {
            for (name, value) in languages {
                let Ok(language) = name.parse::<Language>() else {
                    tracing::warn!("Ignoring backend config for unknown language '{}'", name);
                    continue;
                };

                let mut json = serde_json::to_value(value)?;
                if let Some(table) = json.as_object_mut() {
                    table.insert("language".to_string(), serde_json::to_value(language)?);
                    table
                        .entry("server_id")
                        .or_insert_with(|| table_command(value));
                }

                match serde_json::from_value::<BackendConfig>(json) {
                    Ok(config) => {
                        backends.insert(language, config);
                    }
                    Err(e) => tracing::warn!("Invalid backend config for {}: {}", name, e),
                }
            }
        }

        Ok(backends)
    }

    fn merge_user_config(&mut self, user_configs: HashMap<Language, BackendConfig>) {
        for (_, config) in user_configs {
            self.register(config);
        }
    }

    pub fn is_backend_available(&self, language: Language) -> bool {
        match self.get(language) {
            Some(config) => match which::which(normalize_executable(&config.command)) {
                Ok(path) => {
                    tracing::trace!("Backend for {:?} found at: {:?}", language, path);
                    true
                }
                Err(e) => {
                    tracing::trace!("Backend for {:?} not available: {}", language, e);
                    false
                }
            },
            None => false,
        }
    }

    pub fn list_available_backends(&self) -> Vec<(Language, bool)> {
        self.languages()
            .into_iter()
            .map(|language| (language, self.is_backend_available(language)))
            .collect()
    }
}

fn table_command(value: &toml::Value) -> Value {
    Value::String(
        value
            .get("command")
            .and_then(|c| c.as_str())
            .unwrap_or("custom")
            .to_string(),
    )
}

pub(crate) fn normalize_executable(command: &str) -> String {
    if cfg!(windows) && !command.contains('.') {
        format!("{}.exe", command)
    } else {
        command.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_builtin_registry_covers_main_languages() {
        let registry = BackendRegistry::builtin();
        for language in [Language::Rust, Language::Python, Language::Go, Language::TypeScript] {
            let config = registry.get(language).expect("builtin backend");
            assert!(config.supports(Capability::DocumentSymbol));
            assert_eq!(config.max_restart_attempts, 3);
        }
        assert!(registry.get(Language::Unknown).is_none());
    }

    #[test]
    fn test_parse_user_config_overrides() {
        let content = r#"
            [languages.python]
            command = "pyright-langserver"
            args = ["--stdio"]
            max_restart_attempts = 5
            capabilities = ["document_symbol", "hover"]

            [languages.cobol]
            command = "cobol-ls"
        "#;
        let configs = BackendRegistry::parse_user_config(content).unwrap();
        assert_eq!(configs.len(), 1);

        let python = &configs[&Language::Python];
        assert_eq!(python.command, "pyright-langserver");
        assert_eq!(python.server_id, "pyright-langserver");
        assert_eq!(python.max_restart_attempts, 5);
        assert!(python.supports(Capability::Hover));
        assert!(!python.supports(Capability::References));
        assert_eq!(python.health_probe_method, "workspace/symbol");
    }

    #[test]
    fn test_find_project_root_uses_markers() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("proj");
        let nested = root.join("src").join("deep");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(root.join("Cargo.toml"), "[package]").unwrap();
        let file = nested.join("lib.rs");
        std::fs::write(&file, "fn main() {}").unwrap();

        let registry = BackendRegistry::builtin();
        assert_eq!(
            registry.find_project_root(&file, Language::Rust),
            Some(root.clone())
        );
    }

    #[test]
    fn test_capability_for_method() {
        assert_eq!(
            Capability::for_method("textDocument/hover"),
            Some(Capability::Hover)
        );
        assert_eq!(Capability::for_method("$/cancelRequest"), None);
    }
}
