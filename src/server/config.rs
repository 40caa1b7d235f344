//! Configuration loading for muninnd.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. `--config <path>` (CLI flag, must exist)
//! 2. `~/.muninn/config.toml` (user)
//! 3. `/etc/muninn/config.toml` (system)
//!
//! When neither standard file exists, defaults are used. Environment
//! variables are applied on top of whatever was loaded:
//!
//! | Variable | Overrides |
//! |---|---|
//! | `MUNINN_OLLAMA_HOST`, then `OLLAMA_HOST` | `backend.base_url` |
//! | `MUNINN_DEFAULT_MODEL` | `backend.default_model` |
//! | `MUNINN_VISION_MODEL` | `backend.vision_model` |
//! | `MUNINN_ADDRESS` | `server.address` |

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{CacheConfig, SNAPSHOT_FILE};
use crate::executor::ExecutorConfig;
use crate::gateway::{Muninn, MuninnBuilder};
use crate::limiter::RateLimitConfig;
use crate::model::ModelConfig;
use crate::{MuninnError, Result};

/// Daemon configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub rate_limit: RateLimitSection,
    #[serde(default)]
    pub executor: ExecutorSection,
    #[serde(default)]
    pub transcription: TranscriptionSection,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to (default: 127.0.0.1:8000).
    #[serde(default = "default_address")]
    pub address: String,
    /// Largest accepted upload in megabytes (default: 100).
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,
    /// Filter used when `RUST_LOG` is unset (default: "info").
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            max_upload_mb: default_max_upload_mb(),
            log_level: default_log_level(),
        }
    }
}

impl ServerConfig {
    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}

fn default_address() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_max_upload_mb() -> usize {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Inference backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Ollama base URL (default: http://localhost:11434).
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_vision_model")]
    pub vision_model: String,
    /// Per-call timeout in seconds (default: 120).
    #[serde(default = "default_backend_timeout")]
    pub timeout_secs: u64,
    /// Startup probe timeout in seconds (default: 2).
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            default_model: default_model(),
            vision_model: default_vision_model(),
            timeout_secs: default_backend_timeout(),
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_vision_model() -> String {
    "llava:13b".to_string()
}

fn default_backend_timeout() -> u64 {
    120
}

fn default_probe_timeout() -> u64 {
    2
}

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
    /// Entry bound; least recently used entries go first (default: 10000).
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: u64,
    /// Snapshot every N insertions (default: 10).
    #[serde(default = "default_flush_every")]
    pub flush_every: u64,
    /// Directory holding the snapshot file (default: ./cache).
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: default_cache_ttl(),
            max_entries: default_cache_max_entries(),
            flush_every: default_flush_every(),
            dir: default_cache_dir(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_cache_max_entries() -> u64 {
    10_000
}

fn default_flush_every() -> u64 {
    10
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./cache")
}

/// Per-identity admission limits.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSection {
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,
    #[serde(default = "default_window")]
    pub window_secs: u64,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_secs: default_window(),
        }
    }
}

fn default_max_requests() -> usize {
    100
}

fn default_window() -> u64 {
    3600
}

/// Code execution configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_exec_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_output")]
    pub max_output_chars: usize,
    #[serde(default = "default_python")]
    pub python: String,
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default)]
    pub allow_shell_blocks: bool,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: default_exec_timeout(),
            max_output_chars: default_max_output(),
            python: default_python(),
            shell: default_shell(),
            allow_shell_blocks: false,
        }
    }
}

fn default_exec_timeout() -> u64 {
    10
}

fn default_max_output() -> usize {
    5000
}

fn default_python() -> String {
    "python3".to_string()
}

fn default_shell() -> String {
    "bash".to_string()
}

/// Audio transcription configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranscriptionSection {
    /// No engine ships with muninn; when false, audio gets a placeholder transcript.
    #[serde(default)]
    pub enabled: bool,
}

impl Config {
    /// Load configuration from the standard locations, then apply
    /// environment overrides.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided)
    /// 2. `~/.muninn/config.toml`
    /// 3. `/etc/muninn/config.toml`
    /// 4. Built-in defaults
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut config = match Self::resolve_config_path(explicit_path)? {
            Some(path) => Self::load_from_file(&path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a single TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            MuninnError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            MuninnError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })
    }

    /// Resolve the config file path; `None` means use defaults.
    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(MuninnError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        // User config
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".muninn").join("config.toml");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        // System config
        let system_config = PathBuf::from("/etc/muninn/config.toml");
        if system_config.exists() {
            return Ok(Some(system_config));
        }

        Ok(None)
    }

    /// Apply environment-style overrides read through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(host) = non_empty("MUNINN_OLLAMA_HOST").or_else(|| non_empty("OLLAMA_HOST")) {
            self.backend.base_url = normalize_host(&host);
        }
        if let Some(model) = non_empty("MUNINN_DEFAULT_MODEL") {
            self.backend.default_model = model;
        }
        if let Some(model) = non_empty("MUNINN_VISION_MODEL") {
            self.backend.vision_model = model;
        }
        if let Some(address) = non_empty("MUNINN_ADDRESS") {
            self.server.address = address;
        }
    }

    /// A gateway builder configured from this file.
    ///
    /// The conversation store and transcriber keep their defaults; the
    /// caller can still override them.
    pub fn gateway_builder(&self) -> MuninnBuilder {
        let mut builder = Muninn::builder()
            .ollama(&self.backend.base_url)
            .backend_timeout(Duration::from_secs(self.backend.timeout_secs))
            .models(
                ModelConfig::new()
                    .default_model(&self.backend.default_model)
                    .vision_model(&self.backend.vision_model),
            )
            .rate_limit(
                RateLimitConfig::new()
                    .max_requests(self.rate_limit.max_requests)
                    .window(Duration::from_secs(self.rate_limit.window_secs)),
            )
            .max_upload_bytes(self.server.max_upload_bytes());

        builder = if self.cache.enabled {
            builder.cache(
                CacheConfig::new()
                    .ttl(Duration::from_secs(self.cache.ttl_secs))
                    .max_entries(self.cache.max_entries)
                    .flush_every(self.cache.flush_every)
                    .snapshot_path(self.cache.dir.join(SNAPSHOT_FILE)),
            )
        } else {
            builder.without_cache()
        };

        if self.executor.enabled {
            builder.executor(
                ExecutorConfig::new()
                    .timeout(Duration::from_secs(self.executor.timeout_secs))
                    .max_output_chars(self.executor.max_output_chars)
                    .python(&self.executor.python)
                    .shell(&self.executor.shell)
                    .allow_shell_blocks(self.executor.allow_shell_blocks),
            )
        } else {
            builder.without_executor()
        }
    }
}

/// `OLLAMA_HOST` is often given as `host:port` without a scheme.
fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}
