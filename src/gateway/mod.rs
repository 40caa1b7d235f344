//! Gateway orchestration

mod builder;
mod handler;
mod relay;

pub use builder::{DEFAULT_MAX_UPLOAD_BYTES, Muninn, MuninnBuilder};
pub use handler::RequestGateway;
pub use relay::DEFAULT_STREAM_BUFFER;
