//! Audio transcription seam.

use async_trait::async_trait;

use crate::Result;

/// Placeholder transcript produced while transcription is switched off.
pub const TRANSCRIPTION_DISABLED: &str = "(transcription unavailable)";

/// Speech-to-text collaborator. Treated as a black box by the gateway.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &[u8], filename: &str) -> Result<String>;
}

/// Transcriber used when no speech-to-text engine is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledTranscriber;

#[async_trait]
impl Transcriber for DisabledTranscriber {
    async fn transcribe(&self, _audio: &[u8], _filename: &str) -> Result<String> {
        Ok(TRANSCRIPTION_DISABLED.to_string())
    }
}
