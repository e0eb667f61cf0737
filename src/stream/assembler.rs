use std::sync::Arc;
use std::time::Instant;

use crate::error::CanonicalError;
use crate::fc::ToolCallSimulator;
use crate::observability::log_request_complete;
use crate::protocol::canonical::{
    CanonicalRequest, CanonicalStopReason, CanonicalUsage, ConversionContext, ToolDefinition,
};
use crate::protocol::mapping::backend_finish_to_canonical;
use crate::sanitize::SystemPromptSanitizer;

use super::{BlockDelta, BlockKind, StreamEvent};

/// Where the assembler is in one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Forwarding text deltas as they arrive.
    StreamingText,
    /// Tools are declared; text is held until the backend finishes.
    Buffering,
    Finalizing,
    Done,
}

/// Turns backend text deltas into client stream events for one request.
///
/// Without declared tools every delta is forwarded at once. With tools the
/// whole turn is buffered and the simulator runs exactly once at the end, so
/// tool blocks only ever follow the closed narrative block.
pub struct StreamAssembler {
    ctx: ConversionContext,
    tools: Arc<[ToolDefinition]>,
    user_context: String,
    sanitizer: Arc<SystemPromptSanitizer>,
    max_buffered_bytes: usize,
    phase: Phase,
    open_text_block: Option<usize>,
    truncated: bool,
    model: String,
    started_at: Instant,
}

impl StreamAssembler {
    #[must_use]
    pub fn new(
        request: &CanonicalRequest,
        sanitizer: Arc<SystemPromptSanitizer>,
        max_buffered_bytes: usize,
    ) -> Self {
        Self {
            ctx: ConversionContext::new(request.has_tools()),
            tools: Arc::clone(&request.tools),
            user_context: request.last_user_text(),
            sanitizer,
            max_buffered_bytes,
            phase: Phase::StreamingText,
            open_text_block: None,
            truncated: false,
            model: request.model.clone(),
            started_at: Instant::now(),
        }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Emit `message_start` and pick the mode for the rest of the turn.
    pub fn start(&mut self, out: &mut Vec<StreamEvent>) {
        if self.phase != Phase::StreamingText || self.ctx.next_block_index != 0 {
            return;
        }
        out.push(StreamEvent::MessageStart);
        if self.ctx.has_tools {
            self.phase = Phase::Buffering;
        }
    }

    pub fn on_delta(&mut self, text: &str, out: &mut Vec<StreamEvent>) {
        if text.is_empty() {
            return;
        }
        match self.phase {
            Phase::StreamingText => {
                let index = match self.open_text_block {
                    Some(index) => index,
                    None => {
                        let index = self.ctx.take_block_index();
                        self.open_text_block = Some(index);
                        out.push(StreamEvent::ContentBlockStart {
                            index,
                            block: BlockKind::Text,
                        });
                        index
                    }
                };
                out.push(StreamEvent::ContentBlockDelta {
                    index,
                    delta: BlockDelta::Text(text.to_string()),
                });
            }
            Phase::Buffering => self.buffer(text),
            Phase::Finalizing | Phase::Done => {}
        }
    }

    fn buffer(&mut self, text: &str) {
        let room = self.max_buffered_bytes.saturating_sub(self.ctx.buffer.len());
        if text.len() <= room {
            self.ctx.buffer.push_str(text);
            return;
        }
        let mut cut = room;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        self.ctx.buffer.push_str(&text[..cut]);
        if !self.truncated {
            self.truncated = true;
            tracing::warn!(
                model = %self.model,
                limit = self.max_buffered_bytes,
                "backend reply exceeds buffer cap, ignoring the rest"
            );
        }
    }

    /// The backend finished. Emits remaining blocks, `message_delta` and
    /// `message_stop`.
    pub fn finish(
        &mut self,
        finish_reason: Option<&str>,
        usage: CanonicalUsage,
        out: &mut Vec<StreamEvent>,
    ) {
        let mut stop_reason = backend_finish_to_canonical(finish_reason);
        match self.phase {
            Phase::StreamingText => {
                if let Some(index) = self.open_text_block.take() {
                    out.push(StreamEvent::ContentBlockStop { index });
                }
            }
            Phase::Buffering => {
                self.phase = Phase::Finalizing;
                if self.emit_buffered(out) {
                    stop_reason = CanonicalStopReason::ToolUse;
                }
            }
            Phase::Finalizing | Phase::Done => return,
        }

        out.push(StreamEvent::MessageDelta { stop_reason, usage });
        out.push(StreamEvent::MessageStop);
        self.phase = Phase::Done;
        log_request_complete(&self.model, &usage, self.started_at);
    }

    /// Run the simulator over the buffer and emit the narrative block, then
    /// one block per invocation. Returns whether any invocation was emitted.
    fn emit_buffered(&mut self, out: &mut Vec<StreamEvent>) -> bool {
        let buffer = std::mem::take(&mut self.ctx.buffer);
        let simulation = ToolCallSimulator::new(&self.tools).parse_with_context(
            &mut self.ctx,
            &buffer,
            &self.user_context,
        );

        let narrative = self.sanitizer.scrub_response(&simulation.text);
        if !narrative.trim().is_empty() {
            let index = self.ctx.take_block_index();
            out.push(StreamEvent::ContentBlockStart {
                index,
                block: BlockKind::Text,
            });
            out.push(StreamEvent::ContentBlockDelta {
                index,
                delta: BlockDelta::Text(narrative),
            });
            out.push(StreamEvent::ContentBlockStop { index });
        }

        for invocation in &simulation.invocations {
            let index = self.ctx.take_block_index();
            out.push(StreamEvent::ContentBlockStart {
                index,
                block: BlockKind::ToolUse {
                    id: invocation.id.clone(),
                    name: invocation.name.clone(),
                },
            });
            out.push(StreamEvent::ContentBlockDelta {
                index,
                delta: BlockDelta::InputJson(invocation.input_json()),
            });
            out.push(StreamEvent::ContentBlockStop { index });
        }
        !simulation.invocations.is_empty()
    }

    /// The backend failed mid-turn. Emits one terminal error event; buffered
    /// text is discarded so no partial invocation is ever surfaced.
    pub fn fail(&mut self, err: &CanonicalError, out: &mut Vec<StreamEvent>) {
        if self.phase == Phase::Done {
            return;
        }
        tracing::error!(model = %self.model, error = %err, "backend stream failed");
        self.ctx.buffer.clear();
        self.open_text_block = None;
        out.push(StreamEvent::Error {
            category: err.category(),
            message: err.client_message(),
        });
        self.phase = Phase::Done;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::canonical::{CanonicalMessage, CanonicalRole, GenerationParams, IngressApi};
    use serde_json::json;

    fn request(tools: Vec<ToolDefinition>) -> CanonicalRequest {
        CanonicalRequest {
            request_id: uuid::Uuid::nil(),
            ingress_api: IngressApi::Anthropic,
            client_model: "claude-sonnet-4".to_string(),
            model: "grok-3".to_string(),
            stream: true,
            system: None,
            messages: vec![CanonicalMessage::text(CanonicalRole::User, "make app.py")],
            tools: tools.into(),
            generation: GenerationParams::default(),
        }
    }

    fn tool(name: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            description: String::new(),
            input_schema: json!({"type": "object"}),
        }
    }

    fn assembler(tools: Vec<ToolDefinition>, cap: usize) -> StreamAssembler {
        StreamAssembler::new(
            &request(tools),
            Arc::new(SystemPromptSanitizer::default()),
            cap,
        )
    }

    #[test]
    fn text_is_forwarded_immediately_without_tools() {
        let mut asm = assembler(Vec::new(), 1024);
        let mut out = Vec::new();
        asm.start(&mut out);
        asm.on_delta("Hel", &mut out);
        asm.on_delta("lo", &mut out);
        assert_eq!(asm.phase(), Phase::StreamingText);
        assert_eq!(
            out,
            vec![
                StreamEvent::MessageStart,
                StreamEvent::ContentBlockStart {
                    index: 0,
                    block: BlockKind::Text
                },
                StreamEvent::ContentBlockDelta {
                    index: 0,
                    delta: BlockDelta::Text("Hel".to_string())
                },
                StreamEvent::ContentBlockDelta {
                    index: 0,
                    delta: BlockDelta::Text("lo".to_string())
                },
            ]
        );

        out.clear();
        asm.finish(Some("length"), CanonicalUsage::default(), &mut out);
        assert_eq!(out[0], StreamEvent::ContentBlockStop { index: 0 });
        assert!(matches!(
            out[1],
            StreamEvent::MessageDelta {
                stop_reason: CanonicalStopReason::MaxTokens,
                ..
            }
        ));
        assert_eq!(out[2], StreamEvent::MessageStop);
        assert_eq!(asm.phase(), Phase::Done);
    }

    #[test]
    fn tool_mode_holds_everything_until_finish() {
        let mut asm = assembler(vec![tool("Write")], 1024);
        let mut out = Vec::new();
        asm.start(&mut out);
        assert_eq!(asm.phase(), Phase::Buffering);
        asm.on_delta("Creating it.\n[Tool Call: Write]\n{\"file_path\":", &mut out);
        asm.on_delta("\"app.py\",\"content\":\"print('hi')\\n\"}\n[/Tool Call]", &mut out);
        assert_eq!(out, vec![StreamEvent::MessageStart]);

        out.clear();
        asm.finish(Some("stop"), CanonicalUsage::default(), &mut out);
        let text_stop = out
            .iter()
            .position(|e| *e == StreamEvent::ContentBlockStop { index: 0 })
            .unwrap();
        let tool_start = out
            .iter()
            .position(|e| {
                matches!(
                    e,
                    StreamEvent::ContentBlockStart {
                        block: BlockKind::ToolUse { .. },
                        ..
                    }
                )
            })
            .unwrap();
        assert!(text_stop < tool_start);
        assert!(matches!(
            out[out.len() - 2],
            StreamEvent::MessageDelta {
                stop_reason: CanonicalStopReason::ToolUse,
                ..
            }
        ));
        assert_eq!(out.last(), Some(&StreamEvent::MessageStop));
    }

    #[test]
    fn buffer_cap_truncates_on_char_boundary() {
        let mut asm = assembler(vec![tool("Write")], 5);
        let mut out = Vec::new();
        asm.start(&mut out);
        asm.on_delta("abcd你好", &mut out);
        assert_eq!(asm.ctx.buffer, "abcd");
        asm.on_delta("more", &mut out);
        assert_eq!(asm.ctx.buffer, "abcd");
    }

    #[test]
    fn failure_emits_single_error_and_no_tools() {
        let mut asm = assembler(vec![tool("Write")], 1024);
        let mut out = Vec::new();
        asm.start(&mut out);
        asm.on_delta("[Tool Call: Write]\n{\"file_path\":\"a.py\"", &mut out);
        out.clear();
        asm.fail(&CanonicalError::Transport("reset".to_string()), &mut out);
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], StreamEvent::Error { .. }));
        asm.finish(None, CanonicalUsage::default(), &mut out);
        assert_eq!(out.len(), 1);
    }
}
