//! Inference backend trait.
//!
//! The gateway never talks HTTP to a model server directly; it goes through
//! an [`InferenceBackend`]. Errors returned here are raw: absorbing them into
//! degraded completions is [`ModelClient`](crate::model::ModelClient)'s job.

use async_trait::async_trait;

use crate::Result;
use crate::types::{ChunkStream, Completion, CompletionRequest};

/// A locally hosted model server.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Backend name for logging/debugging.
    fn name(&self) -> &str;

    /// One blocking completion call.
    async fn generate(&self, request: &CompletionRequest) -> Result<Completion>;

    /// Streamed completion. The returned stream ends when the transport closes.
    async fn generate_stream(&self, request: &CompletionRequest) -> Result<ChunkStream>;

    /// Liveness/model-listing probe.
    async fn list_models(&self) -> Result<Vec<String>>;
}
