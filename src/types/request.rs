//! Gateway request and reply types

use serde::{Deserialize, Serialize};

use super::completion::ChunkStream;

/// Identity used when the caller does not supply one.
pub const ANONYMOUS_IDENTITY: &str = "anonymous";

/// A binary attachment uploaded alongside a request.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn new(
        filename: impl Into<String>,
        mime_type: impl Into<String>,
        data: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            filename: filename.into(),
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    pub fn is_audio(&self) -> bool {
        self.mime_type.starts_with("audio/")
    }

    pub fn metadata(&self) -> AttachmentMetadata {
        AttachmentMetadata {
            filename: self.filename.clone(),
            size: self.data.len(),
            mime_type: self.mime_type.clone(),
        }
    }
}

/// Descriptive metadata about an attachment, echoed back in replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentMetadata {
    pub filename: String,
    pub size: usize,
    pub mime_type: String,
}

/// The gateway's public request.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub identity: String,
    pub text: Option<String>,
    pub attachment: Option<Attachment>,
    pub stream: bool,
}

impl GatewayRequest {
    /// Create a text request for `identity`.
    pub fn text(identity: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            text: Some(text.into()),
            attachment: None,
            stream: false,
        }
    }

    /// Attach a file to the request.
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    /// Ask for a streamed reply.
    pub fn streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}

/// Buffered reply to a non-streaming request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessResponse {
    pub response: String,
    pub model: String,
    pub cost: f64,
    pub metadata: Option<AttachmentMetadata>,
    pub processing_time_seconds: f64,
    pub from_cache: bool,
}

/// Reply produced by the gateway: one JSON object or a chunk stream.
pub enum GatewayReply {
    Buffered(ProcessResponse),
    Streaming(ChunkStream),
}

impl std::fmt::Debug for GatewayReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayReply::Buffered(r) => f.debug_tuple("Buffered").field(r).finish(),
            GatewayReply::Streaming(_) => f.write_str("Streaming(..)"),
        }
    }
}
