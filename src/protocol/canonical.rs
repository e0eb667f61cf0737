use std::sync::Arc;

use rustc_hash::FxHashSet;
use smallvec::SmallVec;

/// Which ingress API the request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IngressApi {
    Anthropic,
    OpenAiChat,
}

/// Canonical message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalRole {
    System,
    User,
    Assistant,
    Tool,
}

impl CanonicalRole {
    /// Label used when a turn is rendered into the backend's single text message.
    #[must_use]
    pub fn transcript_label(self) -> &'static str {
        match self {
            CanonicalRole::System => "System",
            CanonicalRole::User => "User",
            CanonicalRole::Assistant => "Assistant",
            CanonicalRole::Tool => "Tool",
        }
    }
}

/// Why the backend stopped, in protocol-neutral terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalStopReason {
    EndOfTurn,
    MaxTokens,
    ContentFilter,
    ToolUse,
}

/// Token usage as reported by the backend. Absent figures stay `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CanonicalUsage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

impl CanonicalUsage {
    #[must_use]
    pub fn input_or_zero(&self) -> u64 {
        self.input_tokens.unwrap_or(0)
    }

    #[must_use]
    pub fn output_or_zero(&self) -> u64 {
        self.output_tokens.unwrap_or(0)
    }
}

/// Image reference: a remote URL or a `data:` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub url: String,
    pub media_type: Option<String>,
}

/// A single part of a message's content.
#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalPart {
    Text(String),
    Image(ImageRef),
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
    Thinking(String),
}

/// A single message in the canonical conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalMessage {
    pub role: CanonicalRole,
    pub parts: SmallVec<[CanonicalPart; 1]>,
}

impl CanonicalMessage {
    #[must_use]
    pub fn text(role: CanonicalRole, text: impl Into<String>) -> Self {
        let mut parts = SmallVec::new();
        parts.push(CanonicalPart::Text(text.into()));
        Self { role, parts }
    }

    /// Text parts joined with newlines, ignoring every other part kind.
    #[must_use]
    pub fn joined_text(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            if let CanonicalPart::Text(text) = part {
                if text.is_empty() {
                    continue;
                }
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
        out
    }
}

/// A tool the client declared, already unwrapped from any function wrapper.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Sampling parameters carried for the backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationParams {
    pub max_tokens: Option<u64>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
}

/// The fully-decoded, protocol-neutral request.
#[derive(Debug, Clone)]
pub struct CanonicalRequest {
    pub request_id: uuid::Uuid,
    pub ingress_api: IngressApi,
    /// Model name exactly as the client sent it; echoed back in responses.
    pub client_model: String,
    /// Backend model after alias resolution.
    pub model: String,
    pub stream: bool,
    pub system: Option<String>,
    pub messages: Vec<CanonicalMessage>,
    pub tools: Arc<[ToolDefinition]>,
    pub generation: GenerationParams,
}

impl CanonicalRequest {
    #[must_use]
    pub fn has_tools(&self) -> bool {
        !self.tools.is_empty()
    }

    /// Text of the most recent user turn, or an empty string.
    #[must_use]
    pub fn last_user_text(&self) -> String {
        self.messages
            .iter()
            .rev()
            .find(|msg| msg.role == CanonicalRole::User)
            .map(CanonicalMessage::joined_text)
            .unwrap_or_default()
    }
}

/// A complete backend turn, before any tool recovery.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalResponse {
    pub id: String,
    pub text: String,
    pub stop_reason: CanonicalStopReason,
    pub usage: CanonicalUsage,
}

/// Per-request scratch state shared by the simulator and the stream assembler.
#[derive(Debug, Default)]
pub struct ConversionContext {
    /// Backend text observed so far in tool mode.
    pub buffer: String,
    /// Index the next content block will be emitted at.
    pub next_block_index: usize,
    /// `(tool name, primary argument)` keys already emitted in this response.
    pub emitted_keys: FxHashSet<String>,
    pub has_tools: bool,
}

impl ConversionContext {
    #[must_use]
    pub fn new(has_tools: bool) -> Self {
        Self {
            has_tools,
            ..Self::default()
        }
    }

    /// Reserve the next content-block index.
    pub fn take_block_index(&mut self) -> usize {
        let index = self.next_block_index;
        self.next_block_index += 1;
        index
    }

    /// Record a dedup key. Returns `false` when it was already present.
    pub fn claim_key(&mut self, key: String) -> bool {
        self.emitted_keys.insert(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joined_text_skips_non_text_parts() {
        let mut msg = CanonicalMessage::text(CanonicalRole::User, "first");
        msg.parts.push(CanonicalPart::Image(ImageRef {
            url: "https://img.test/a.png".to_string(),
            media_type: None,
        }));
        msg.parts.push(CanonicalPart::Text("second".to_string()));
        assert_eq!(msg.joined_text(), "first\nsecond");
    }

    #[test]
    fn context_hands_out_sequential_indices() {
        let mut ctx = ConversionContext::new(true);
        assert_eq!(ctx.take_block_index(), 0);
        assert_eq!(ctx.take_block_index(), 1);
        assert!(ctx.claim_key("Read\u{1f}a.py".to_string()));
        assert!(!ctx.claim_key("Read\u{1f}a.py".to_string()));
    }
}
