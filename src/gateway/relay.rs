//! Streaming relay between the backend and the client.
//!
//! A spawned producer reads the backend stream and forwards each chunk
//! through a bounded channel, so a slow client pushes back on the backend
//! instead of growing memory. Alongside forwarding it accumulates exactly the
//! chunks the client channel accepted. Once the backend stream drains, any
//! runnable code block is executed and its augmentation sent as one final
//! chunk. The accumulated text is then persisted as the assistant turn
//! before the channel closes, so the concatenation of received chunks equals
//! the persisted text.
//!
//! If the client goes away, forwarding stops, execution is skipped and
//! whatever was accepted so far is persisted. That includes up to `buffer`
//! chunks that sat in the channel and never reached the client, so the
//! persisted turn can be longer than what was actually read.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::executor::CodeExecutor;
use crate::store::ConversationStore;
use crate::telemetry;
use crate::types::{ChunkStream, Completion, Message};
use crate::MuninnError;

/// Default number of chunks buffered between backend and client.
pub const DEFAULT_STREAM_BUFFER: usize = 64;

pub(crate) struct Relay {
    pub identity: String,
    pub store: Arc<dyn ConversationStore>,
    pub executor: Option<CodeExecutor>,
    pub buffer: usize,
}

impl Relay {
    /// Start relaying `source`; requires a tokio runtime.
    pub(crate) fn spawn(self, source: ChunkStream) -> ChunkStream {
        let (tx, rx) = mpsc::channel(self.buffer.max(1));
        tokio::spawn(self.run(source, tx));
        Box::pin(ReceiverStream::new(rx))
    }

    async fn run(self, mut source: ChunkStream, tx: mpsc::Sender<crate::Result<String>>) {
        let mut transcript = String::new();
        let mut connected = true;

        while let Some(item) = source.next().await {
            let (chunk, last) = match item {
                Ok(chunk) => (chunk, false),
                Err(e) => {
                    warn!(identity = %self.identity, error = %e, "backend stream broke");
                    (Completion::degraded(e).content, true)
                }
            };
            if tx.send(Ok(chunk.clone())).await.is_err() {
                connected = false;
                break;
            }
            metrics::counter!(telemetry::STREAM_CHUNKS_TOTAL).increment(1);
            transcript.push_str(&chunk);
            if last {
                break;
            }
        }
        // release the backend connection before running any code
        drop(source);

        if connected
            && let Some(executor) = &self.executor
            && let Some(extra) = executor.augment(&transcript).await
        {
            if tx.send(Ok(extra.clone())).await.is_ok() {
                metrics::counter!(telemetry::STREAM_CHUNKS_TOTAL).increment(1);
                transcript.push_str(&extra);
            } else {
                connected = false;
            }
        }

        if !connected {
            debug!(identity = %self.identity, chars = transcript.len(), "client disconnected mid-stream");
        }

        if let Err(e) = self
            .store
            .append(&self.identity, Message::assistant(transcript))
            .await
        {
            warn!(identity = %self.identity, error = %e, "failed to persist streamed reply");
            let _ = tx.send(Err(MuninnError::Persistence(e.to_string()))).await;
        }
    }
}
