use serde_json::Value;
use smallvec::SmallVec;

use crate::error::CanonicalError;
use crate::protocol::anthropic::{AnthropicMessage, AnthropicRequest};
use crate::protocol::canonical::{
    CanonicalMessage, CanonicalPart, CanonicalRequest, GenerationParams, ImageRef, IngressApi,
};
use crate::protocol::mapping::anthropic_role_to_canonical;
use crate::protocol::transcoder::{decode_tools, invalid, tool_result_text};

pub const DEFAULT_MAX_TOKENS: u64 = 4096;
pub const MAX_TOKENS_LIMIT: u64 = 100_000;

/// Parse an Anthropic Messages API request into canonical form.
///
/// `check_max_tokens` is off for `count_tokens`, which does not generate.
///
/// # Errors
///
/// Returns [`CanonicalError::InvalidRequest`] naming the offending field.
pub fn decode_anthropic_request(
    request: AnthropicRequest,
    request_id: uuid::Uuid,
    check_max_tokens: bool,
) -> Result<CanonicalRequest, CanonicalError> {
    let AnthropicRequest {
        model,
        max_tokens,
        system,
        messages: wire_messages,
        tools,
        stream,
        temperature,
        top_p,
    } = request;

    if model.trim().is_empty() {
        return Err(invalid("model: Field required"));
    }
    if wire_messages.is_empty() {
        return Err(invalid("messages: at least one message is required"));
    }
    let max_tokens = max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
    if check_max_tokens && !(1..=MAX_TOKENS_LIMIT).contains(&max_tokens) {
        return Err(invalid(format!(
            "max_tokens: Input should be between 1 and {MAX_TOKENS_LIMIT}"
        )));
    }

    let mut messages = Vec::with_capacity(wire_messages.len());
    for (i, AnthropicMessage { role, content }) in wire_messages.into_iter().enumerate() {
        let role = anthropic_role_to_canonical(&role).ok_or_else(|| {
            invalid(format!(
                "messages.{i}.role: Input should be 'user' or 'assistant'"
            ))
        })?;
        messages.push(CanonicalMessage {
            role,
            parts: decode_content(content),
        });
    }

    Ok(CanonicalRequest {
        request_id,
        ingress_api: IngressApi::Anthropic,
        client_model: model.clone(),
        model,
        stream: stream.unwrap_or(false),
        system: decode_system_prompt(system),
        messages,
        tools: decode_tools(tools)?,
        generation: GenerationParams {
            max_tokens: Some(max_tokens),
            temperature,
            top_p,
        },
    })
}

/// String, or the text blocks of a block array joined with newlines.
fn decode_system_prompt(system: Option<Value>) -> Option<String> {
    match system? {
        Value::String(s) => Some(s),
        Value::Array(blocks) => {
            let texts: Vec<String> = blocks
                .into_iter()
                .filter_map(|block| {
                    let Value::Object(mut obj) = block else {
                        return None;
                    };
                    if obj.get("type").and_then(Value::as_str) != Some("text") {
                        return None;
                    }
                    match obj.remove("text") {
                        Some(Value::String(text)) => Some(text),
                        _ => None,
                    }
                })
                .collect();
            if texts.is_empty() {
                None
            } else {
                Some(texts.join("\n"))
            }
        }
        _ => None,
    }
}

fn take_string(obj: &mut serde_json::Map<String, Value>, key: &str) -> String {
    match obj.remove(key) {
        Some(Value::String(s)) => s,
        _ => String::new(),
    }
}

fn decode_image(source: Option<Value>) -> Option<ImageRef> {
    let Value::Object(mut source) = source? else {
        return None;
    };
    match source.get("type").and_then(Value::as_str) {
        Some("base64") => {
            let media_type = take_string(&mut source, "media_type");
            let data = take_string(&mut source, "data");
            Some(ImageRef {
                url: format!("data:{media_type};base64,{data}"),
                media_type: Some(media_type),
            })
        }
        Some("url") => Some(ImageRef {
            url: take_string(&mut source, "url"),
            media_type: None,
        }),
        _ => None,
    }
}

/// Decode a content value (string or block array) into canonical parts,
/// keeping block order.
fn decode_content(content: Value) -> SmallVec<[CanonicalPart; 1]> {
    let mut parts = SmallVec::new();
    match content {
        Value::String(s) => parts.push(CanonicalPart::Text(s)),
        Value::Array(blocks) => {
            for block in blocks {
                let Value::Object(mut obj) = block else {
                    continue;
                };
                let block_type = obj
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("text")
                    .to_string();
                match block_type.as_str() {
                    "text" => parts.push(CanonicalPart::Text(take_string(&mut obj, "text"))),
                    "image" => {
                        if let Some(image) = decode_image(obj.remove("source")) {
                            parts.push(CanonicalPart::Image(image));
                        }
                    }
                    "tool_use" => parts.push(CanonicalPart::ToolUse {
                        id: take_string(&mut obj, "id"),
                        name: take_string(&mut obj, "name"),
                        input: obj
                            .remove("input")
                            .unwrap_or_else(|| Value::Object(serde_json::Map::new())),
                    }),
                    "tool_result" => parts.push(CanonicalPart::ToolResult {
                        tool_use_id: take_string(&mut obj, "tool_use_id"),
                        content: tool_result_text(obj.remove("content")),
                        is_error: obj.get("is_error").and_then(Value::as_bool).unwrap_or(false),
                    }),
                    "thinking" => {
                        parts.push(CanonicalPart::Thinking(take_string(&mut obj, "thinking")));
                    }
                    other => tracing::debug!(block_type = other, "ignoring content block"),
                }
            }
        }
        _ => {}
    }
    parts
}
