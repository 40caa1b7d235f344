//! Fenced code block extraction from model output.

const FENCE: &str = "```";

/// Languages the executor knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Python,
    Shell,
}

impl Language {
    /// Map a fence info string (e.g. `python`, `sh`) to a language.
    pub fn from_info(info: &str) -> Option<Self> {
        let tag = info.split_whitespace().next()?.to_ascii_lowercase();
        match tag.as_str() {
            "python" | "python3" | "py" => Some(Language::Python),
            "bash" | "sh" | "shell" => Some(Language::Shell),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Shell => "shell",
        }
    }
}

/// A runnable block lifted out of a completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    pub language: Language,
    pub source: String,
}

/// Find the first fenced block tagged with a runnable language.
///
/// Blocks in other languages are skipped. An unterminated fence runs to the
/// end of the text.
pub fn extract_code_block(text: &str) -> Option<CodeBlock> {
    let mut rest = text;
    while let Some(open) = rest.find(FENCE) {
        let after = &rest[open + FENCE.len()..];
        let (info, body) = match after.find('\n') {
            Some(nl) => (&after[..nl], &after[nl + 1..]),
            None => (after, ""),
        };
        let (source, remainder) = match body.find(FENCE) {
            Some(close) => (&body[..close], &body[close + FENCE.len()..]),
            None => (body, ""),
        };

        if let Some(language) = Language::from_info(info) {
            let source = source.trim();
            if !source.is_empty() {
                return Some(CodeBlock {
                    language,
                    source: source.to_string(),
                });
            }
        }
        rest = remainder;
    }
    None
}
