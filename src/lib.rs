//! Muninn - local LLM orchestration gateway
//!
//! This crate sits in front of a locally hosted inference backend (Ollama)
//! and coordinates everything around a completion: per-identity admission
//! control, content-addressed response caching, multi-turn prompt assembly,
//! streamed relay with durable persistence, and time-boxed execution of
//! code the model writes.
//!
//! # Example
//!
//! ```rust,no_run
//! use muninn::{GatewayReply, GatewayRequest, Muninn};
//!
//! #[tokio::main]
//! async fn main() -> muninn::Result<()> {
//!     let gateway = Muninn::builder()
//!         .ollama("http://localhost:11434")
//!         .build()?;
//!
//!     let reply = gateway.handle(GatewayRequest::text("alice", "2+2?")).await?;
//!     if let GatewayReply::Buffered(reply) = reply {
//!         println!("{} (cached: {})", reply.response, reply.from_cache);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Components
//!
//! - [`limiter`]: sliding-window admission control
//! - [`cache`]: response cache with periodic snapshots
//! - [`prompt`]: conversation linearization
//! - [`model`] / [`providers`]: backend selection and the Ollama client
//! - [`executor`]: code execution (not a sandbox, see module docs)
//! - [`store`] / [`audio`]: conversation ledger and transcription seams
//! - [`gateway`]: the orchestrator tying them together
//! - `server`: HTTP surface and daemon configuration (feature `server`)

pub mod audio;
pub mod cache;
pub mod error;
pub mod executor;
pub mod gateway;
pub mod limiter;
pub mod model;
pub mod prompt;
pub mod providers;
#[cfg(feature = "server")]
pub mod server;
pub mod store;
pub mod telemetry;
pub mod types;
pub mod version;

// Re-export main types at crate root
pub use error::{MuninnError, Result};
pub use gateway::{Muninn, MuninnBuilder, RequestGateway};
pub use version::{PKG_NAME, PKG_VERSION, version_string};

// Re-export all types
pub use types::{
    Attachment, AttachmentMetadata, ChunkStream, Completion, CompletionRequest, ContentPart,
    GatewayReply, GatewayRequest, Message, MessageContent, ProcessResponse, Role, StreamChunk,
};
