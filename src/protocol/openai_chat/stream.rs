use crate::protocol::error_shapes::openai_error_payload;
use crate::protocol::mapping::canonical_stop_to_openai;
use crate::protocol::openai_chat::{
    OpenAiDelta, OpenAiStreamChoice, OpenAiStreamChunk, OpenAiStreamToolCall,
    OpenAiStreamToolCallFunction, OpenAiUsage,
};
use crate::stream::sse::{openai_sse_frame, DONE_FRAME};
use crate::stream::{BlockDelta, BlockKind, StreamEncoder, StreamEvent};
use crate::util::unix_now_secs;

/// Writes stream events as `chat.completion.chunk` frames.
///
/// Each tool block becomes a single chunk carrying the whole call; block
/// stops have no counterpart in this protocol.
#[derive(Debug, Clone)]
pub struct OpenAiStreamEncoder {
    id: String,
    model: String,
    created: u64,
    open_tool: Option<(String, String)>,
    next_tool_index: u32,
}

impl OpenAiStreamEncoder {
    #[must_use]
    pub fn new(id: String, model: String) -> Self {
        Self {
            id,
            model,
            created: unix_now_secs(),
            open_tool: None,
            next_tool_index: 0,
        }
    }

    fn push_chunk(
        &self,
        out: &mut String,
        delta: OpenAiDelta<'_>,
        finish_reason: Option<&'static str>,
        usage: Option<OpenAiUsage>,
    ) {
        let chunk = OpenAiStreamChunk {
            id: &self.id,
            object: "chat.completion.chunk",
            created: self.created,
            model: &self.model,
            choices: [OpenAiStreamChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage,
        };
        match serde_json::to_string(&chunk) {
            Ok(json) => out.push_str(&openai_sse_frame(&json)),
            Err(err) => tracing::error!(error = %err, "failed to encode stream chunk"),
        }
    }
}

impl StreamEncoder for OpenAiStreamEncoder {
    fn encode(&mut self, event: &StreamEvent, out: &mut String) {
        match event {
            StreamEvent::MessageStart => {
                let delta = OpenAiDelta {
                    role: Some("assistant"),
                    content: Some(""),
                    ..OpenAiDelta::default()
                };
                self.push_chunk(out, delta, None, None);
            }
            StreamEvent::ContentBlockStart { block, .. } => {
                if let BlockKind::ToolUse { id, name } = block {
                    self.open_tool = Some((id.clone(), name.clone()));
                }
            }
            StreamEvent::ContentBlockDelta { delta, .. } => match delta {
                BlockDelta::Text(text) => {
                    let delta = OpenAiDelta {
                        content: Some(text.as_str()),
                        ..OpenAiDelta::default()
                    };
                    self.push_chunk(out, delta, None, None);
                }
                BlockDelta::InputJson(arguments) => {
                    let Some((id, name)) = self.open_tool.take() else {
                        return;
                    };
                    let index = self.next_tool_index;
                    self.next_tool_index += 1;
                    let delta = OpenAiDelta {
                        tool_calls: Some([OpenAiStreamToolCall {
                            index,
                            id: &id,
                            type_: "function",
                            function: OpenAiStreamToolCallFunction {
                                name: &name,
                                arguments,
                            },
                        }]),
                        ..OpenAiDelta::default()
                    };
                    self.push_chunk(out, delta, None, None);
                }
            },
            StreamEvent::ContentBlockStop { .. } => {}
            StreamEvent::MessageDelta { stop_reason, usage } => {
                self.push_chunk(
                    out,
                    OpenAiDelta::default(),
                    Some(canonical_stop_to_openai(*stop_reason)),
                    Some((*usage).into()),
                );
            }
            StreamEvent::MessageStop => out.push_str(DONE_FRAME),
            StreamEvent::Error { category, message } => {
                let payload = openai_error_payload(*category, message);
                out.push_str(&openai_sse_frame(&payload.to_string()));
                out.push_str(DONE_FRAME);
            }
        }
    }
}
