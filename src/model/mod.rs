//! Model client: backend selection and failure absorption.
//!
//! [`ModelClient`] picks the vision model when image data is present and the
//! default text model otherwise. It offers two flavours of every call:
//!
//! - `try_*` methods surface backend failures as [`MuninnError`](crate::MuninnError)
//!   so callers can branch on an unreachable backend ([`is_upstream`](crate::MuninnError::is_upstream)).
//! - the plain methods absorb failures into a *successful-looking* degraded
//!   result whose content explains the error and whose model is
//!   [`ERROR_MODEL`](crate::types::ERROR_MODEL). The conversation then still
//!   records an explicable assistant turn. This is intentional.

use std::sync::Arc;

use futures_util::stream;
use tracing::{info, warn};

use crate::prompt::{AssembledPrompt, linearize};
use crate::providers::InferenceBackend;
use crate::types::{ChunkStream, Completion, CompletionRequest, Message};
use crate::Result;

/// Model names used by [`ModelClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    /// Text model. Default: `llama3.1:8b`.
    pub default_model: String,
    /// Vision-capable model used when images are attached. Default: `llava:13b`.
    pub vision_model: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            default_model: "llama3.1:8b".to_string(),
            vision_model: "llava:13b".to_string(),
        }
    }
}

impl ModelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn vision_model(mut self, model: impl Into<String>) -> Self {
        self.vision_model = model.into();
        self
    }
}

/// Output of [`ModelClient::respond`].
pub enum ModelOutput {
    Completion(Completion),
    Stream(ChunkStream),
}

/// Talks to the inference backend on behalf of the gateway.
#[derive(Clone)]
pub struct ModelClient {
    backend: Arc<dyn InferenceBackend>,
    config: ModelConfig,
}

impl ModelClient {
    pub fn new(backend: Arc<dyn InferenceBackend>, config: ModelConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Model that will serve a prompt with or without images.
    pub fn select_model(&self, has_images: bool) -> &str {
        if has_images {
            &self.config.vision_model
        } else {
            &self.config.default_model
        }
    }

    /// Backend request for `prompt`.
    pub fn request_for(&self, prompt: &AssembledPrompt, stream: bool) -> CompletionRequest {
        CompletionRequest::new(self.select_model(prompt.has_images()), prompt.text.clone())
            .images(prompt.images.clone())
            .streaming(stream)
    }

    /// One blocking completion; backend failures are returned as errors.
    pub async fn try_complete(&self, prompt: &AssembledPrompt) -> Result<Completion> {
        self.backend.generate(&self.request_for(prompt, false)).await
    }

    /// One blocking completion; backend failures become a degraded completion.
    pub async fn complete(&self, prompt: &AssembledPrompt) -> Completion {
        match self.try_complete(prompt).await {
            Ok(completion) => completion,
            Err(e) => {
                warn!(backend = self.backend.name(), error = %e, "completion failed; degrading");
                Completion::degraded(e)
            }
        }
    }

    /// Streamed completion; failing to open the stream is returned as an error.
    pub async fn try_complete_stream(&self, prompt: &AssembledPrompt) -> Result<ChunkStream> {
        self.backend
            .generate_stream(&self.request_for(prompt, true))
            .await
    }

    /// Streamed completion; failing to open the stream yields a single chunk
    /// holding the degraded error text.
    pub async fn complete_stream(&self, prompt: &AssembledPrompt) -> ChunkStream {
        match self.try_complete_stream(prompt).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(backend = self.backend.name(), error = %e, "stream failed to open; degrading");
                Box::pin(stream::iter([Ok(Completion::degraded(e).content)]))
            }
        }
    }

    /// Complete a full message list in the requested mode.
    pub async fn respond(
        &self,
        messages: &[Message],
        image: Option<String>,
        stream: bool,
    ) -> ModelOutput {
        let prompt = AssembledPrompt {
            text: linearize(messages),
            images: image.into_iter().collect(),
        };
        if stream {
            ModelOutput::Stream(self.complete_stream(&prompt).await)
        } else {
            ModelOutput::Completion(self.complete(&prompt).await)
        }
    }

    /// Liveness probe: list the models the backend can serve.
    pub async fn probe(&self) -> Result<Vec<String>> {
        let models = self.backend.list_models().await?;
        info!(backend = self.backend.name(), models = models.len(), "backend reachable");
        Ok(models)
    }
}
