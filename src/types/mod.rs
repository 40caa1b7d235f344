//! Public types for the Muninn API.

mod completion;
mod message;
mod request;

pub use completion::{ChunkStream, Completion, CompletionRequest, ERROR_MODEL, StreamChunk};
pub use message::{ContentPart, Message, MessageContent, Role};
pub use request::{
    ANONYMOUS_IDENTITY, Attachment, AttachmentMetadata, GatewayReply, GatewayRequest,
    ProcessResponse,
};
