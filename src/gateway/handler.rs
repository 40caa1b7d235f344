//! Request orchestration.
//!
//! [`RequestGateway::handle`] walks one request through
//! admission, context building, cache lookup or model call, optional code
//! execution, persistence, and reply:
//!
//! ```text
//! ADMITTED -> CONTEXT_BUILT -> (CACHE_HIT | MODEL_CALLED) -> (CODE_EXECUTED)? -> PERSISTED -> RESPONDED
//! ```
//!
//! Rejections (admission, payload size, empty request) happen before any
//! collaborator is touched. Backend and execution failures are reported
//! inside a successful reply body. Conversation store failures fail the
//! request.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use super::relay::Relay;
use crate::audio::Transcriber;
use crate::cache::{CacheStats, ResponseCache, digest_hex};
use crate::executor::CodeExecutor;
use crate::limiter::RateLimiter;
use crate::model::ModelClient;
use crate::prompt::PromptAssembler;
use crate::store::ConversationStore;
use crate::telemetry;
use crate::types::{
    Attachment, ContentPart, GatewayReply, GatewayRequest, Message, ProcessResponse,
};
use crate::{MuninnError, Result};

/// What the cache remembers about a buffered reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedReply {
    response: String,
    model: String,
    cost: f64,
}

/// The orchestrator. Build one with [`Muninn::builder`](super::Muninn::builder)
/// and share it behind an `Arc`.
pub struct RequestGateway {
    pub(super) limiter: RateLimiter,
    pub(super) cache: Option<Arc<ResponseCache>>,
    pub(super) assembler: PromptAssembler,
    pub(super) model: ModelClient,
    pub(super) executor: Option<CodeExecutor>,
    pub(super) store: Arc<dyn ConversationStore>,
    pub(super) transcriber: Arc<dyn Transcriber>,
    pub(super) max_upload_bytes: usize,
    pub(super) stream_buffer: usize,
}

impl RequestGateway {
    /// Handle one request end to end.
    pub async fn handle(&self, request: GatewayRequest) -> Result<GatewayReply> {
        let started = Instant::now();
        let identity = request.identity.clone();

        let result = self.process(request, started).await;

        let outcome = match &result {
            Ok(GatewayReply::Buffered(reply)) if reply.from_cache => "cached",
            Ok(GatewayReply::Buffered(_)) => "ok",
            Ok(GatewayReply::Streaming(_)) => "streamed",
            Err(MuninnError::AdmissionDenied { .. }) => "denied",
            Err(e) if e.is_rejection() => "rejected",
            Err(_) => "error",
        };
        let elapsed = started.elapsed();
        match &result {
            Err(e) if !e.is_rejection() => {
                warn!(identity = %identity, duration_ms = elapsed.as_millis() as u64, outcome, error = %e, "request failed")
            }
            _ => info!(identity = %identity, duration_ms = elapsed.as_millis() as u64, outcome, "request handled"),
        }
        metrics::counter!(telemetry::REQUESTS_TOTAL, "outcome" => outcome).increment(1);
        if matches!(result, Ok(GatewayReply::Buffered(_))) {
            metrics::histogram!(telemetry::REQUEST_DURATION_SECONDS).record(elapsed.as_secs_f64());
        }

        result
    }

    async fn process(&self, request: GatewayRequest, started: Instant) -> Result<GatewayReply> {
        let GatewayRequest {
            identity,
            text,
            attachment,
            stream,
        } = request;

        if !self.limiter.check(&identity) {
            return Err(MuninnError::AdmissionDenied { identity });
        }
        if let Some(attachment) = &attachment
            && attachment.data.len() > self.max_upload_bytes
        {
            return Err(MuninnError::PayloadTooLarge {
                size: attachment.data.len(),
                limit: self.max_upload_bytes,
            });
        }
        let text = text.filter(|t| !t.trim().is_empty());
        if text.is_none() && attachment.is_none() {
            return Err(MuninnError::InvalidInput(
                "request carries neither text nor an attachment".to_string(),
            ));
        }

        // CONTEXT_BUILT
        let history = self
            .store
            .load_history(&identity)
            .await
            .map_err(persistence)?;
        let user_turn = self.user_turn(text, attachment.as_ref()).await?;
        self.store
            .append(&identity, user_turn.clone())
            .await
            .map_err(persistence)?;

        let images: Vec<Attachment> = attachment.iter().filter(|a| a.is_image()).cloned().collect();
        let prompt = self.assembler.build(&history, &user_turn, &images);
        let metadata = attachment.as_ref().map(Attachment::metadata);

        if stream {
            let chunks = self.model.complete_stream(&prompt).await;
            let relay = Relay {
                identity,
                store: self.store.clone(),
                executor: self.executor.clone(),
                buffer: self.stream_buffer,
            };
            return Ok(GatewayReply::Streaming(relay.spawn(chunks)));
        }

        let cache_content = self.cache.as_ref().map(|_| {
            json!({
                "model": self.model.select_model(prompt.has_images()),
                "text": user_turn.content.text(),
                "image_sha256": images.first().map(|a| digest_hex(&a.data)),
            })
        });
        if let (Some(cache), Some(content)) = (&self.cache, &cache_content)
            && let Some(hit) = cache.get_as::<CachedReply>(content)
        {
            self.store
                .append(&identity, Message::assistant(hit.response.clone()))
                .await
                .map_err(persistence)?;
            return Ok(GatewayReply::Buffered(ProcessResponse {
                response: hit.response,
                model: hit.model,
                cost: hit.cost,
                metadata,
                processing_time_seconds: started.elapsed().as_secs_f64(),
                from_cache: true,
            }));
        }

        // MODEL_CALLED
        let completion = self.model.complete(&prompt).await;
        let mut response = completion.content.clone();
        if let Some(executor) = &self.executor
            && let Some(extra) = executor.augment(&completion.content).await
        {
            response.push_str(&extra);
        }

        // PERSISTED
        self.store
            .append(&identity, Message::assistant(response.clone()))
            .await
            .map_err(persistence)?;

        if !completion.is_degraded()
            && let (Some(cache), Some(content)) = (&self.cache, &cache_content)
        {
            let cached = CachedReply {
                response: response.clone(),
                model: completion.model.clone(),
                cost: completion.cost,
            };
            match serde_json::to_value(&cached) {
                Ok(payload) => cache.store(content, payload),
                Err(e) => warn!(error = %e, "failed to encode reply for cache"),
            }
        }

        Ok(GatewayReply::Buffered(ProcessResponse {
            response,
            model: completion.model,
            cost: completion.cost,
            metadata,
            processing_time_seconds: started.elapsed().as_secs_f64(),
            from_cache: false,
        }))
    }

    /// Fold text and attachment into the new user turn.
    async fn user_turn(&self, text: Option<String>, attachment: Option<&Attachment>) -> Result<Message> {
        let Some(attachment) = attachment else {
            return Ok(Message::user(text.unwrap_or_default()));
        };

        if attachment.is_image() {
            let mut parts = Vec::with_capacity(2);
            if let Some(text) = text {
                parts.push(ContentPart::Text { text });
            }
            parts.push(ContentPart::Image {
                filename: attachment.filename.clone(),
                mime_type: attachment.mime_type.clone(),
            });
            return Ok(Message::user_parts(parts));
        }

        if attachment.is_audio() {
            let transcript = self
                .transcriber
                .transcribe(&attachment.data, &attachment.filename)
                .await?;
            let segment = format!("[Audio: {}]\n{}", attachment.filename, transcript);
            return Ok(Message::user(match text {
                Some(text) => format!("{text}\n\n{segment}"),
                None => segment,
            }));
        }

        Ok(Message::user(
            text.unwrap_or_else(|| format!("[File: {}]", attachment.filename)),
        ))
    }

    /// Cache counters, or `None` when caching is disabled.
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|c| c.stats())
    }

    /// Force a cache snapshot. Returns the number of entries written.
    pub fn flush_cache(&self) -> Result<usize> {
        match &self.cache {
            Some(cache) => cache.flush(),
            None => Ok(0),
        }
    }

    /// Models the backend reports; used as a liveness probe.
    pub async fn probe(&self) -> Result<Vec<String>> {
        self.model.probe().await
    }

    pub fn model(&self) -> &ModelClient {
        &self.model
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }
}

fn persistence(e: MuninnError) -> MuninnError {
    match e {
        MuninnError::Persistence(_) => e,
        other => MuninnError::Persistence(other.to_string()),
    }
}
