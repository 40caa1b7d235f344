//! Completion request and result types

use std::pin::Pin;

use futures_util::Stream;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Sentinel model name carried by degraded completions.
pub const ERROR_MODEL: &str = "error";

/// A single request to the inference backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    /// Base64-encoded images for vision-capable models.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    pub stream: bool,
}

impl CompletionRequest {
    /// Create a non-streaming request for `model`.
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            images: Vec::new(),
            stream: false,
        }
    }

    /// Attach base64 image payloads.
    pub fn images(mut self, images: Vec<String>) -> Self {
        self.images = images;
        self
    }

    /// Request an incrementally streamed completion.
    pub fn streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}

/// Result of a non-streaming completion.
///
/// A completion whose `model` is [`ERROR_MODEL`] is degraded: the backend
/// failed and `content` holds a human-readable explanation instead of
/// generated text. Degraded completions are still returned as successes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub content: String,
    pub model: String,
    #[serde(default)]
    pub token_count: u64,
    #[serde(default)]
    pub cost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Completion {
    /// Build the degraded completion reported when the backend fails.
    pub fn degraded(error: impl std::fmt::Display) -> Self {
        let error = error.to_string();
        Self {
            content: format!("Local model error: {error}"),
            model: ERROR_MODEL.to_string(),
            token_count: 0,
            cost: 0.0,
            error: Some(error),
        }
    }

    /// Whether this completion stands in for a backend failure.
    pub fn is_degraded(&self) -> bool {
        self.model == ERROR_MODEL
    }
}

/// An incremental fragment of assistant text.
pub type StreamChunk = String;

/// Lazy, finite, non-restartable sequence of stream chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degraded_completion_carries_sentinel() {
        let c = Completion::degraded("connection refused");
        assert!(c.is_degraded());
        assert_eq!(c.cost, 0.0);
        assert!(c.content.contains("connection refused"));
        assert_eq!(c.error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn request_omits_empty_images() {
        let req = CompletionRequest::new("llama3.1:8b", "User: hi\n\nAssistant:");
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("images").is_none());
        assert_eq!(json["stream"], false);
    }
}
