use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub supervisor: SupervisorConfig,
    pub index: IndexConfig,
    pub analyzer: AnalyzerConfig,
}

/// Backend supervision, pooling and caching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SupervisorConfig {
    pub max_pool_size: usize,
    pub cache_ttl_secs: u64,
    pub cache_max_entries: usize,
    /// How often expired cache entries are swept
    pub cache_purge_interval_secs: u64,
    /// Per-request deadline; exceeded requests fail with `BackendTimeout`
    pub request_timeout_ms: u64,
    pub batch_interval_ms: u64,
    pub batch_size: usize,
    pub incremental_interval_ms: u64,
    pub health_probe_timeout_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_pool_size: 3,
            cache_ttl_secs: 300,
            cache_max_entries: 1000,
            cache_purge_interval_secs: 60,
            request_timeout_ms: 30_000,
            batch_interval_ms: 100,
            batch_size: 10,
            incremental_interval_ms: 50,
            health_probe_timeout_ms: 5_000,
        }
    }
}

impl SupervisorConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn cache_purge_interval(&self) -> Duration {
        Duration::from_secs(self.cache_purge_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms.max(1))
    }

    pub fn incremental_interval(&self) -> Duration {
        Duration::from_millis(self.incremental_interval_ms.max(1))
    }

    pub fn health_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.health_probe_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndexConfig {
    /// Files indexed concurrently during a project scan
    pub concurrency: usize,
    /// Expected symbol count the membership filter is sized for
    pub filter_capacity: usize,
    pub filter_false_positive_rate: f64,
    pub max_file_size_bytes: u64,
    pub exclude_dirs: Vec<String>,
    pub default_max_results: usize,
    pub query_cache_entries: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            concurrency: num_cpus::get().clamp(1, 16),
            filter_capacity: 10_000,
            filter_false_positive_rate: 0.01,
            max_file_size_bytes: 2 * 1024 * 1024,
            exclude_dirs: [
                "node_modules",
                "target",
                ".git",
                "dist",
                "build",
                "vendor",
                "__pycache__",
                ".venv",
            ]
            .iter()
            .map(|d| d.to_string())
            .collect(),
            default_max_results: 100,
            query_cache_entries: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Methods on one class before it is reported as a God Class
    pub god_class_threshold: usize,
    pub complexity_threshold: i64,
    pub coupling_threshold: usize,
    pub cache_ttl_secs: u64,
    pub cache_max_entries: u64,
    /// Upper bound on per-symbol reference lookups in one analysis
    pub max_reference_lookups: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            god_class_threshold: 20,
            complexity_threshold: 10,
            coupling_threshold: 8,
            cache_ttl_secs: 300,
            cache_max_entries: 500,
            max_reference_lookups: 50,
        }
    }
}

impl AnalyzerConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| anyhow!("Invalid value for {}: {:?}", name, value)),
        Err(_) => Ok(None),
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: Self =
            toml::from_str(&content).context("Failed to parse TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load configuration with priority: env -> file -> defaults
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        let config_paths = [
            std::env::var("CODEMUX_CONFIG").ok().map(PathBuf::from),
            dirs::config_dir().map(|d| d.join("codemux").join("config.toml")),
            Some(PathBuf::from("codemux.toml")),
        ];

        for config_path in config_paths.into_iter().flatten() {
            if config_path.exists() {
                info!("Loading configuration from {:?}", config_path);
                config = Self::from_file(&config_path)
                    .with_context(|| format!("Failed to load config from {config_path:?}"))?;
                break;
            }
        }

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(v) = parse_env("CODEMUX_MAX_POOL_SIZE")? {
            self.supervisor.max_pool_size = v;
        }
        if let Some(v) = parse_env("CODEMUX_CACHE_TTL_SECS")? {
            self.supervisor.cache_ttl_secs = v;
        }
        if let Some(v) = parse_env("CODEMUX_CACHE_MAX_ENTRIES")? {
            self.supervisor.cache_max_entries = v;
        }
        if let Some(v) = parse_env("CODEMUX_REQUEST_TIMEOUT_MS")? {
            self.supervisor.request_timeout_ms = v;
        }
        if let Some(v) = parse_env("CODEMUX_INDEX_CONCURRENCY")? {
            self.index.concurrency = v;
        }
        if let Some(v) = parse_env("CODEMUX_FILTER_CAPACITY")? {
            self.index.filter_capacity = v;
        }
        if let Some(v) = parse_env("CODEMUX_GOD_CLASS_THRESHOLD")? {
            self.analyzer.god_class_threshold = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.supervisor.max_pool_size == 0 {
            return Err(anyhow!("supervisor.max_pool_size must be greater than 0"));
        }
        if self.supervisor.batch_size == 0 {
            return Err(anyhow!("supervisor.batch_size must be greater than 0"));
        }
        if self.supervisor.cache_max_entries == 0 {
            return Err(anyhow!("supervisor.cache_max_entries must be greater than 0"));
        }
        if self.supervisor.request_timeout_ms < 100 {
            warn!(
                "request_timeout_ms is very low ({}ms), requests may time out",
                self.supervisor.request_timeout_ms
            );
        }
        if self.index.concurrency == 0 || self.index.concurrency > 64 {
            return Err(anyhow!(
                "index.concurrency must be between 1 and 64, got {}",
                self.index.concurrency
            ));
        }
        if self.index.filter_capacity == 0 {
            return Err(anyhow!("index.filter_capacity must be greater than 0"));
        }
        let fp = self.index.filter_false_positive_rate;
        if !(fp > 0.0 && fp < 1.0) {
            return Err(anyhow!(
                "index.filter_false_positive_rate must be in (0, 1), got {}",
                fp
            ));
        }
        if self.analyzer.god_class_threshold == 0 {
            return Err(anyhow!("analyzer.god_class_threshold must be greater than 0"));
        }

        debug!("Configuration validation passed");
        Ok(())
    }
}
