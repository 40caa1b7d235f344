//! Linearizes conversation turns into a single completion prompt.
//!
//! Turns are rendered in chronological order as `"<Role>: <content>"`,
//! separated by a blank line, and the prompt always ends with an
//! `"\n\nAssistant:"` cue. Structured content contributes only its text
//! parts; images travel out-of-band on the vision channel.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::types::{Attachment, Message};

/// Cue appended to every prompt to elicit an assistant completion.
pub const ASSISTANT_CUE: &str = "\n\nAssistant:";

/// A prompt ready for a plain-text completion backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledPrompt {
    pub text: String,
    /// Base64-encoded image attachments for the vision channel.
    pub images: Vec<String>,
}

impl AssembledPrompt {
    pub fn has_images(&self) -> bool {
        !self.images.is_empty()
    }
}

/// Stateless, backend-agnostic prompt builder.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptAssembler;

impl PromptAssembler {
    pub fn new() -> Self {
        Self
    }

    /// Build the prompt for `history` followed by `new_turn`.
    ///
    /// Image attachments are base64-encoded into [`AssembledPrompt::images`];
    /// other attachments never reach the prompt through this path.
    pub fn build(
        &self,
        history: &[Message],
        new_turn: &Message,
        attachments: &[Attachment],
    ) -> AssembledPrompt {
        AssembledPrompt {
            text: linearize(history.iter().chain(std::iter::once(new_turn))),
            images: attachments
                .iter()
                .filter(|a| a.is_image())
                .map(|a| STANDARD.encode(&a.data))
                .collect(),
        }
    }
}

/// Render `turns` as `"<Role>: <content>"` blocks plus the assistant cue.
pub fn linearize<'a>(turns: impl IntoIterator<Item = &'a Message>) -> String {
    let body = turns
        .into_iter()
        .map(|m| format!("{}: {}", m.role.label(), m.content.text()))
        .collect::<Vec<_>>()
        .join("\n\n");
    body + ASSISTANT_CUE
}
