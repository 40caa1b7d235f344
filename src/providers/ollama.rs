//! Ollama HTTP backend.
//!
//! Uses the plain completion endpoint (`POST /api/generate`) so the gateway
//! controls prompt assembly, and `GET /api/tags` as the liveness probe.
//! See: <https://github.com/ollama/ollama/blob/main/docs/api.md>

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, Stream};
use futures_util::StreamExt;
use reqwest::{Client, Response};
use serde::Deserialize;
use tracing::{debug, instrument};

use super::ndjson::NdjsonDecoder;
use super::traits::InferenceBackend;
use crate::telemetry;
use crate::types::{ChunkStream, Completion, CompletionRequest};
use crate::version::version_string;
use crate::{MuninnError, Result};

/// Default base URL of a local Ollama daemon.
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Client for a local Ollama daemon.
#[derive(Clone)]
pub struct OllamaBackend {
    http: Client,
    base_url: String,
    timeout: Duration,
}

impl OllamaBackend {
    /// Create a backend for `base_url` with the given request timeout.
    ///
    /// Local models can be slow; the timeout bounds a whole non-streaming
    /// call and the connection phase of a streaming one.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent(version_string())
            .connect_timeout(timeout)
            .build()?;
        Ok(Self::with_http_client(base_url, http, timeout))
    }

    /// Create a backend sharing an existing HTTP client.
    pub fn with_http_client(base_url: impl Into<String>, http: Client, timeout: Duration) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_generate(&self, request: &CompletionRequest) -> Result<Response> {
        let url = format!("{}/api/generate", self.base_url);
        let mut builder = self.http.post(&url).json(request);
        // a streamed body may legitimately outlive the timeout
        if !request.stream {
            builder = builder.timeout(self.timeout);
        }
        check_status(builder.send().await?).await
    }
}

#[async_trait]
impl InferenceBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    #[instrument(name = "ollama.generate", skip_all, fields(model = %request.model))]
    async fn generate(&self, request: &CompletionRequest) -> Result<Completion> {
        let body = CompletionRequest {
            stream: false,
            ..request.clone()
        };
        let result = async {
            let response = self.post_generate(&body).await?;
            let parsed: GenerateResponse = response.json().await?;
            Ok::<_, MuninnError>(parsed)
        }
        .await;

        record_backend_call(&request.model, result.is_ok());
        let parsed = result?;
        debug!(tokens = parsed.eval_count, "completion received");

        Ok(Completion {
            content: parsed.response,
            model: request.model.clone(),
            token_count: parsed.eval_count,
            cost: 0.0,
            error: None,
        })
    }

    #[instrument(name = "ollama.generate_stream", skip_all, fields(model = %request.model))]
    async fn generate_stream(&self, request: &CompletionRequest) -> Result<ChunkStream> {
        let body = CompletionRequest {
            stream: true,
            ..request.clone()
        };
        let result = self.post_generate(&body).await;
        record_backend_call(&request.model, result.is_ok());
        let response = result?;

        Ok(decode_fragments(response.bytes_stream()))
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);
        let response = check_status(self.http.get(&url).send().await?).await?;
        let tags: TagsResponse = response.json().await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

/// Turn a transport byte stream into a stream of text fragments.
pub(crate) fn decode_fragments<S, B>(transport: S) -> ChunkStream
where
    S: Stream<Item = reqwest::Result<B>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    struct State<S> {
        transport: Pin<Box<S>>,
        decoder: NdjsonDecoder,
        pending: VecDeque<String>,
        finished: bool,
    }

    let state = State {
        transport: Box::pin(transport),
        decoder: NdjsonDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    Box::pin(stream::unfold(state, |mut st| async move {
        loop {
            if let Some(fragment) = st.pending.pop_front() {
                return Some((Ok(fragment), st));
            }
            if st.finished {
                return None;
            }
            match st.transport.next().await {
                Some(Ok(bytes)) => {
                    let fragments = st.decoder.push(bytes.as_ref());
                    st.pending.extend(fragments);
                }
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((Err(MuninnError::Stream(e.to_string())), st));
                }
                None => {
                    st.finished = true;
                    let fragments = st.decoder.finish();
                    st.pending.extend(fragments);
                }
            }
        }
    }))
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response
        .text()
        .await
        .unwrap_or_else(|e| format!("<unreadable body: {e}>"));
    Err(MuninnError::Api {
        status: status.as_u16(),
        message,
    })
}

fn record_backend_call(model: &str, ok: bool) {
    let status = if ok { "ok" } else { "error" };
    metrics::counter!(
        telemetry::BACKEND_REQUESTS_TOTAL,
        "model" => model.to_string(),
        "status" => status
    )
    .increment(1);
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    eval_count: u64,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Deserialize)]
struct TagModel {
    name: String,
}
