//! Builder for configuring gateway instances

use std::sync::Arc;
use std::time::Duration;

use super::RequestGateway;
use super::relay::DEFAULT_STREAM_BUFFER;
use crate::Result;
use crate::audio::{DisabledTranscriber, Transcriber};
use crate::cache::{CacheConfig, ResponseCache, SnapshotLoad};
use crate::executor::{CodeExecutor, ExecutorConfig};
use crate::limiter::{RateLimitConfig, RateLimiter};
use crate::model::{ModelClient, ModelConfig};
use crate::prompt::PromptAssembler;
use crate::providers::{InferenceBackend, OllamaBackend, ollama::DEFAULT_BASE_URL};
use crate::store::{ConversationStore, InMemoryConversationStore};

/// Default upload limit: 100 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

/// Main entry point for creating gateway instances.
pub struct Muninn;

impl Muninn {
    /// Create a new builder for configuring the gateway.
    pub fn builder() -> MuninnBuilder {
        MuninnBuilder::new()
    }
}

/// Builder for configuring gateway instances.
///
/// ```rust,no_run
/// use muninn::Muninn;
/// use muninn::cache::CacheConfig;
///
/// # fn main() -> muninn::Result<()> {
/// let gateway = Muninn::builder()
///     .ollama("http://localhost:11434")
///     .cache(CacheConfig::new().snapshot_path("./cache/cache.json"))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct MuninnBuilder {
    ollama_url: Option<String>,
    backend: Option<Arc<dyn InferenceBackend>>,
    backend_timeout: Duration,
    models: ModelConfig,
    rate_limit: RateLimitConfig,
    cache: Option<CacheConfig>,
    executor: Option<ExecutorConfig>,
    store: Option<Arc<dyn ConversationStore>>,
    transcriber: Option<Arc<dyn Transcriber>>,
    max_upload_bytes: usize,
    stream_buffer: usize,
}

impl MuninnBuilder {
    pub fn new() -> Self {
        Self {
            ollama_url: None,
            backend: None,
            backend_timeout: Duration::from_secs(120),
            models: ModelConfig::default(),
            rate_limit: RateLimitConfig::default(),
            cache: Some(CacheConfig::default()),
            executor: Some(ExecutorConfig::default()),
            store: None,
            transcriber: None,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            stream_buffer: DEFAULT_STREAM_BUFFER,
        }
    }

    /// Configure the Ollama daemon URL (default: `http://localhost:11434`).
    pub fn ollama(mut self, url: impl Into<String>) -> Self {
        self.ollama_url = Some(url.into());
        self
    }

    /// Use a custom inference backend instead of Ollama.
    pub fn backend(mut self, backend: Arc<dyn InferenceBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Request timeout for the Ollama backend (default: 120s).
    pub fn backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = timeout;
        self
    }

    /// Set the text and vision model names.
    pub fn models(mut self, models: ModelConfig) -> Self {
        self.models = models;
        self
    }

    /// Configure per-identity admission limits.
    pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit = config;
        self
    }

    /// Configure the response cache (enabled by default, memory only).
    pub fn cache(mut self, config: CacheConfig) -> Self {
        self.cache = Some(config);
        self
    }

    /// Disable the response cache.
    pub fn without_cache(mut self) -> Self {
        self.cache = None;
        self
    }

    /// Configure code execution (enabled by default).
    pub fn executor(mut self, config: ExecutorConfig) -> Self {
        self.executor = Some(config);
        self
    }

    /// Never run code blocks found in completions.
    pub fn without_executor(mut self) -> Self {
        self.executor = None;
        self
    }

    /// Set the conversation store (default: in-memory).
    pub fn store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the audio transcriber (default: disabled placeholder).
    pub fn transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    /// Largest accepted attachment in bytes.
    pub fn max_upload_bytes(mut self, bytes: usize) -> Self {
        self.max_upload_bytes = bytes;
        self
    }

    /// Chunks buffered between backend and client when streaming.
    pub fn stream_buffer(mut self, size: usize) -> Self {
        self.stream_buffer = size;
        self
    }

    /// Build the gateway, restoring the cache snapshot if one is configured.
    pub fn build(self) -> Result<RequestGateway> {
        Ok(self.build_with_snapshot()?.0)
    }

    /// Build the gateway and report how the cache snapshot was loaded.
    pub fn build_with_snapshot(self) -> Result<(RequestGateway, SnapshotLoad)> {
        let backend: Arc<dyn InferenceBackend> = match self.backend {
            Some(backend) => backend,
            None => Arc::new(OllamaBackend::new(
                self.ollama_url.as_deref().unwrap_or(DEFAULT_BASE_URL),
                self.backend_timeout,
            )?),
        };

        let (cache, snapshot) = match self.cache {
            Some(config) => {
                let (cache, snapshot) = ResponseCache::open(config);
                (Some(Arc::new(cache)), snapshot)
            }
            None => (None, SnapshotLoad::Absent),
        };

        let gateway = RequestGateway {
            limiter: RateLimiter::new(self.rate_limit),
            cache,
            assembler: PromptAssembler::new(),
            model: ModelClient::new(backend, self.models),
            executor: self.executor.map(CodeExecutor::new),
            store: self
                .store
                .unwrap_or_else(|| Arc::new(InMemoryConversationStore::new())),
            transcriber: self
                .transcriber
                .unwrap_or_else(|| Arc::new(DisabledTranscriber)),
            max_upload_bytes: self.max_upload_bytes,
            stream_buffer: self.stream_buffer,
        };
        Ok((gateway, snapshot))
    }
}

impl Default for MuninnBuilder {
    fn default() -> Self {
        Self::new()
    }
}
