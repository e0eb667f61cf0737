use crate::protocol::anthropic::{AnthropicContentBlock, AnthropicResponse, AnthropicUsage};
use crate::protocol::mapping::canonical_stop_to_anthropic;
use crate::protocol::transcoder::AssistantTurn;

/// Build the non-streaming Messages response.
///
/// The narrative comes first as one text block, then one `tool_use` block per
/// invocation. A turn with neither still carries an empty text block.
#[must_use]
pub fn encode_anthropic_response(turn: AssistantTurn) -> AnthropicResponse {
    let mut content = Vec::with_capacity(turn.invocations.len() + 1);
    if !turn.text.is_empty() || turn.invocations.is_empty() {
        content.push(AnthropicContentBlock::Text { text: turn.text });
    }
    content.extend(
        turn.invocations
            .into_iter()
            .map(|invocation| AnthropicContentBlock::ToolUse {
                id: invocation.id,
                name: invocation.name,
                input: invocation.input,
            }),
    );

    AnthropicResponse {
        id: turn.id,
        type_: "message",
        role: "assistant",
        model: turn.model,
        content,
        stop_reason: canonical_stop_to_anthropic(turn.stop_reason),
        stop_sequence: None,
        usage: AnthropicUsage {
            input_tokens: turn.usage.input_or_zero(),
            output_tokens: turn.usage.output_or_zero(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fc::ToolInvocation;
    use crate::protocol::canonical::{CanonicalStopReason, CanonicalUsage};
    use serde_json::json;

    fn turn(text: &str, invocations: Vec<ToolInvocation>) -> AssistantTurn {
        AssistantTurn {
            id: "msg_1".to_string(),
            model: "claude-sonnet-4".to_string(),
            text: text.to_string(),
            invocations,
            stop_reason: CanonicalStopReason::EndOfTurn,
            usage: CanonicalUsage {
                input_tokens: Some(12),
                output_tokens: None,
            },
        }
    }

    #[test]
    fn text_only_response_shape() {
        let body = serde_json::to_value(encode_anthropic_response(turn("hi", Vec::new()))).unwrap();
        assert_eq!(
            body,
            json!({
                "id": "msg_1",
                "type": "message",
                "role": "assistant",
                "model": "claude-sonnet-4",
                "content": [{"type": "text", "text": "hi"}],
                "stop_reason": "end_turn",
                "stop_sequence": null,
                "usage": {"input_tokens": 12, "output_tokens": 0}
            })
        );
    }

    #[test]
    fn empty_narrative_is_omitted_next_to_tools() {
        let input = json!({"file_path": "a.py"}).as_object().cloned().unwrap();
        let mut t = turn("", vec![ToolInvocation::new("Read", input, None)]);
        t.stop_reason = CanonicalStopReason::ToolUse;
        let body = serde_json::to_value(encode_anthropic_response(t)).unwrap();
        assert_eq!(body["content"].as_array().unwrap().len(), 1);
        assert_eq!(body["content"][0]["type"], "tool_use");
        assert_eq!(body["content"][0]["input"]["file_path"], "a.py");
        assert_eq!(body["stop_reason"], "tool_use");
    }
}
