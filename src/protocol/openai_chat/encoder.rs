use crate::protocol::canonical::CanonicalUsage;
use crate::protocol::mapping::canonical_stop_to_openai;
use crate::protocol::openai_chat::{
    OpenAiChatResponse, OpenAiChoice, OpenAiMessage, OpenAiToolCall, OpenAiToolCallFunction,
    OpenAiUsage,
};
use crate::protocol::transcoder::AssistantTurn;
use crate::util::unix_now_secs;

impl From<CanonicalUsage> for OpenAiUsage {
    fn from(usage: CanonicalUsage) -> Self {
        let prompt_tokens = usage.input_or_zero();
        let completion_tokens = usage.output_or_zero();
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Build the non-streaming Chat Completion response. `content` is `null`
/// when the turn is only tool calls.
#[must_use]
pub fn encode_openai_response(turn: AssistantTurn) -> OpenAiChatResponse {
    let tool_calls: Vec<OpenAiToolCall> = turn
        .invocations
        .iter()
        .map(|invocation| OpenAiToolCall {
            id: invocation.id.clone(),
            type_: "function".to_string(),
            function: OpenAiToolCallFunction {
                name: invocation.name.clone(),
                arguments: invocation.input_json(),
            },
        })
        .collect();

    let content = if turn.text.is_empty() && !tool_calls.is_empty() {
        None
    } else {
        Some(serde_json::Value::String(turn.text))
    };

    OpenAiChatResponse {
        id: turn.id,
        object: "chat.completion",
        created: unix_now_secs(),
        model: turn.model,
        choices: vec![OpenAiChoice {
            index: 0,
            message: OpenAiMessage {
                role: "assistant".to_string(),
                content,
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                tool_call_id: None,
            },
            finish_reason: canonical_stop_to_openai(turn.stop_reason),
        }],
        usage: turn.usage.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fc::ToolInvocation;
    use crate::protocol::canonical::CanonicalStopReason;
    use serde_json::json;

    #[test]
    fn tool_calls_reuse_invocation_ids() {
        let input = json!({"command": "ls -la"}).as_object().cloned().unwrap();
        let invocation = ToolInvocation::new("Bash", input, None);
        let id = invocation.id.clone();
        let turn = AssistantTurn {
            id: "chatcmpl-1".to_string(),
            model: "gpt-4o".to_string(),
            text: String::new(),
            invocations: vec![invocation],
            stop_reason: CanonicalStopReason::ToolUse,
            usage: CanonicalUsage {
                input_tokens: Some(3),
                output_tokens: Some(4),
            },
        };
        let body = serde_json::to_value(encode_openai_response(turn)).unwrap();
        let choice = &body["choices"][0];
        assert_eq!(choice["finish_reason"], "tool_calls");
        assert!(choice["message"]["content"].is_null());
        assert_eq!(choice["message"]["tool_calls"][0]["id"], id.as_str());
        assert_eq!(choice["message"]["tool_calls"][0]["type"], "function");
        assert_eq!(
            choice["message"]["tool_calls"][0]["function"]["arguments"],
            "{\"command\":\"ls -la\"}"
        );
        assert_eq!(body["usage"]["total_tokens"], 7);
        assert_eq!(body["object"], "chat.completion");
    }

    #[test]
    fn text_only_has_no_tool_calls_field() {
        let turn = AssistantTurn {
            id: "chatcmpl-1".to_string(),
            model: "gpt-4o".to_string(),
            text: "hello".to_string(),
            invocations: Vec::new(),
            stop_reason: CanonicalStopReason::MaxTokens,
            usage: CanonicalUsage::default(),
        };
        let body = serde_json::to_value(encode_openai_response(turn)).unwrap();
        assert_eq!(body["choices"][0]["message"]["content"], "hello");
        assert!(body["choices"][0]["message"].get("tool_calls").is_none());
        assert_eq!(body["choices"][0]["finish_reason"], "length");
        assert_eq!(body["usage"]["prompt_tokens"], 0);
    }
}
