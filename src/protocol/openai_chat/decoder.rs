use serde_json::Value;
use smallvec::SmallVec;

use crate::error::CanonicalError;
use crate::protocol::canonical::{
    CanonicalMessage, CanonicalPart, CanonicalRequest, CanonicalRole, GenerationParams, ImageRef,
    IngressApi,
};
use crate::protocol::mapping::openai_role_to_canonical;
use crate::protocol::openai_chat::{OpenAiChatRequest, OpenAiMessage, OpenAiToolCall};
use crate::protocol::transcoder::{decode_tools, invalid, tool_result_text};

/// Parse an `OpenAI` Chat Completion request into canonical form.
///
/// `system` and `developer` turns fold into the system text; `tool` turns
/// become tool results and assistant `tool_calls` become tool-use parts.
///
/// # Errors
///
/// Returns [`CanonicalError::InvalidRequest`] naming the offending field.
pub fn decode_openai_chat_request(
    request: OpenAiChatRequest,
    request_id: uuid::Uuid,
) -> Result<CanonicalRequest, CanonicalError> {
    let OpenAiChatRequest {
        model,
        messages: wire_messages,
        tools,
        stream,
        temperature,
        top_p,
        max_tokens,
        max_completion_tokens,
    } = request;

    if model.trim().is_empty() {
        return Err(invalid("model: Field required"));
    }
    if wire_messages.is_empty() {
        return Err(invalid("messages: at least one message is required"));
    }

    let mut system_texts: Vec<String> = Vec::new();
    let mut messages = Vec::with_capacity(wire_messages.len());
    for (i, msg) in wire_messages.into_iter().enumerate() {
        let role = openai_role_to_canonical(&msg.role).ok_or_else(|| {
            invalid(format!(
                "messages.{i}.role: Input should be 'system', 'developer', 'user', 'assistant' or 'tool'"
            ))
        })?;
        let OpenAiMessage {
            content,
            tool_calls,
            tool_call_id,
            ..
        } = msg;

        match role {
            CanonicalRole::System => {
                let text = content_text(content);
                if !text.is_empty() {
                    system_texts.push(text);
                }
            }
            CanonicalRole::Tool => {
                let mut parts = SmallVec::new();
                parts.push(CanonicalPart::ToolResult {
                    tool_use_id: tool_call_id.unwrap_or_default(),
                    content: tool_result_text(content),
                    is_error: false,
                });
                messages.push(CanonicalMessage { role, parts });
            }
            CanonicalRole::User | CanonicalRole::Assistant => {
                let mut parts = decode_content(content);
                parts.extend(tool_calls.into_iter().flatten().map(decode_tool_call));
                messages.push(CanonicalMessage { role, parts });
            }
        }
    }

    Ok(CanonicalRequest {
        request_id,
        ingress_api: IngressApi::OpenAiChat,
        client_model: model.clone(),
        model,
        stream: stream.unwrap_or(false),
        system: if system_texts.is_empty() {
            None
        } else {
            Some(system_texts.join("\n"))
        },
        messages,
        tools: decode_tools(tools)?,
        generation: GenerationParams {
            max_tokens: max_completion_tokens.or(max_tokens),
            temperature,
            top_p,
        },
    })
}

/// Arguments that are not valid JSON are kept as a string value.
fn decode_tool_call(call: OpenAiToolCall) -> CanonicalPart {
    let input = serde_json::from_str::<Value>(&call.function.arguments)
        .unwrap_or(Value::String(call.function.arguments));
    CanonicalPart::ToolUse {
        id: call.id,
        name: call.function.name,
        input,
    }
}

fn content_text(content: Option<Value>) -> String {
    decode_content(content)
        .into_iter()
        .filter_map(|part| match part {
            CanonicalPart::Text(text) => Some(text),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn decode_content(content: Option<Value>) -> SmallVec<[CanonicalPart; 1]> {
    let mut parts = SmallVec::new();
    match content {
        Some(Value::String(s)) => parts.push(CanonicalPart::Text(s)),
        Some(Value::Array(items)) => {
            for item in items {
                let Value::Object(mut obj) = item else {
                    continue;
                };
                match obj.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        if let Some(Value::String(text)) = obj.remove("text") {
                            parts.push(CanonicalPart::Text(text));
                        }
                    }
                    Some("image_url") => {
                        let url = match obj.remove("image_url") {
                            Some(Value::String(url)) => Some(url),
                            Some(Value::Object(mut inner)) => match inner.remove("url") {
                                Some(Value::String(url)) => Some(url),
                                _ => None,
                            },
                            _ => None,
                        };
                        if let Some(url) = url {
                            parts.push(CanonicalPart::Image(ImageRef {
                                media_type: data_url_media_type(&url),
                                url,
                            }));
                        }
                    }
                    other => tracing::debug!(part_type = ?other, "ignoring content part"),
                }
            }
        }
        _ => {}
    }
    parts
}

fn data_url_media_type(url: &str) -> Option<String> {
    let rest = url.strip_prefix("data:")?;
    let end = rest.find([';', ','])?;
    Some(rest[..end].to_string())
}
