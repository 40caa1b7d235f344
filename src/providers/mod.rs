//! Inference backend implementations.
//!
//! [`InferenceBackend`] is the seam between the gateway and a model server.
//! [`OllamaBackend`] is the only shipped implementation; tests substitute
//! their own.

pub mod ndjson;
pub mod ollama;
pub mod traits;

pub use ndjson::NdjsonDecoder;
pub use ollama::OllamaBackend;
pub use traits::InferenceBackend;
