use serde_json::json;

use crate::protocol::error_shapes::anthropic_error_payload;
use crate::protocol::mapping::canonical_stop_to_anthropic;
use crate::stream::sse::anthropic_sse_frame;
use crate::stream::{BlockDelta, BlockKind, StreamEncoder, StreamEvent};
use crate::util::push_json_string_escaped;

/// Writes stream events as Messages API SSE frames.
#[derive(Debug, Clone)]
pub struct AnthropicStreamEncoder {
    id: String,
    model: String,
}

impl AnthropicStreamEncoder {
    #[must_use]
    pub fn new(id: String, model: String) -> Self {
        Self { id, model }
    }
}

impl StreamEncoder for AnthropicStreamEncoder {
    fn encode(&mut self, event: &StreamEvent, out: &mut String) {
        match event {
            StreamEvent::MessageStart => {
                let data = json!({
                    "type": "message_start",
                    "message": {
                        "id": self.id,
                        "type": "message",
                        "role": "assistant",
                        "model": self.model,
                        "content": [],
                        "stop_reason": null,
                        "stop_sequence": null,
                        "usage": {"input_tokens": 0, "output_tokens": 0}
                    }
                });
                out.push_str(&anthropic_sse_frame("message_start", &data.to_string()));
            }
            StreamEvent::ContentBlockStart { index, block } => {
                let content_block = match block {
                    BlockKind::Text => json!({"type": "text", "text": ""}),
                    BlockKind::ToolUse { id, name } => {
                        json!({"type": "tool_use", "id": id, "name": name, "input": {}})
                    }
                };
                let data = json!({
                    "type": "content_block_start",
                    "index": index,
                    "content_block": content_block
                });
                out.push_str(&anthropic_sse_frame("content_block_start", &data.to_string()));
            }
            StreamEvent::ContentBlockDelta { index, delta } => {
                let (kind, field, value) = match delta {
                    BlockDelta::Text(text) => ("text_delta", "text", text),
                    BlockDelta::InputJson(json) => ("input_json_delta", "partial_json", json),
                };
                let mut data = String::with_capacity(96 + value.len());
                data.push_str("{\"type\":\"content_block_delta\",\"index\":");
                data.push_str(&index.to_string());
                data.push_str(",\"delta\":{\"type\":\"");
                data.push_str(kind);
                data.push_str("\",\"");
                data.push_str(field);
                data.push_str("\":");
                push_json_string_escaped(&mut data, value);
                data.push_str("}}");
                out.push_str(&anthropic_sse_frame("content_block_delta", &data));
            }
            StreamEvent::ContentBlockStop { index } => {
                let data = format!("{{\"type\":\"content_block_stop\",\"index\":{index}}}");
                out.push_str(&anthropic_sse_frame("content_block_stop", &data));
            }
            StreamEvent::MessageDelta { stop_reason, usage } => {
                let data = json!({
                    "type": "message_delta",
                    "delta": {
                        "stop_reason": canonical_stop_to_anthropic(*stop_reason),
                        "stop_sequence": null
                    },
                    "usage": {
                        "input_tokens": usage.input_or_zero(),
                        "output_tokens": usage.output_or_zero()
                    }
                });
                out.push_str(&anthropic_sse_frame("message_delta", &data.to_string()));
            }
            StreamEvent::MessageStop => {
                out.push_str(&anthropic_sse_frame(
                    "message_stop",
                    "{\"type\":\"message_stop\"}",
                ));
            }
            StreamEvent::Error { category, message } => {
                let data = anthropic_error_payload(*category, message);
                out.push_str(&anthropic_sse_frame("error", &data.to_string()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use crate::protocol::canonical::{CanonicalStopReason, CanonicalUsage};

    fn encode(event: &StreamEvent) -> String {
        let mut encoder = AnthropicStreamEncoder::new("msg_1".to_string(), "m".to_string());
        let mut out = String::new();
        encoder.encode(event, &mut out);
        out
    }

    fn data_of(frame: &str) -> serde_json::Value {
        let line = frame.lines().nth(1).unwrap();
        serde_json::from_str(line.strip_prefix("data: ").unwrap()).unwrap()
    }

    #[test]
    fn text_delta_escapes_payload() {
        let frame = encode(&StreamEvent::ContentBlockDelta {
            index: 2,
            delta: BlockDelta::Text("say \"hi\"\n".to_string()),
        });
        assert!(frame.starts_with("event: content_block_delta\n"));
        let data = data_of(&frame);
        assert_eq!(data["index"], 2);
        assert_eq!(data["delta"]["type"], "text_delta");
        assert_eq!(data["delta"]["text"], "say \"hi\"\n");
    }

    #[test]
    fn tool_block_carries_id_and_partial_json() {
        let start = data_of(&encode(&StreamEvent::ContentBlockStart {
            index: 1,
            block: BlockKind::ToolUse {
                id: "toolu_1".to_string(),
                name: "Write".to_string(),
            },
        }));
        assert_eq!(start["content_block"]["type"], "tool_use");
        assert_eq!(start["content_block"]["id"], "toolu_1");

        let delta = data_of(&encode(&StreamEvent::ContentBlockDelta {
            index: 1,
            delta: BlockDelta::InputJson("{\"a\":1}".to_string()),
        }));
        assert_eq!(delta["delta"]["type"], "input_json_delta");
        assert_eq!(delta["delta"]["partial_json"], "{\"a\":1}");
    }

    #[test]
    fn message_delta_maps_stop_reason() {
        let data = data_of(&encode(&StreamEvent::MessageDelta {
            stop_reason: CanonicalStopReason::ToolUse,
            usage: CanonicalUsage {
                input_tokens: None,
                output_tokens: Some(4),
            },
        }));
        assert_eq!(data["delta"]["stop_reason"], "tool_use");
        assert_eq!(data["usage"]["output_tokens"], 4);
    }

    #[test]
    fn error_event_uses_error_envelope() {
        let frame = encode(&StreamEvent::Error {
            category: ErrorCategory::ServerError,
            message: "backend down".to_string(),
        });
        assert!(frame.starts_with("event: error\n"));
        let data = data_of(&frame);
        assert_eq!(data["type"], "error");
        assert_eq!(data["error"]["type"], "api_error");
        assert_eq!(data["error"]["message"], "backend down");
    }
}
