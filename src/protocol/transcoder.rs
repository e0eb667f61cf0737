//! Conversion between client wire bodies, the canonical form and the single
//! text turn the backend receives.

use std::sync::Arc;

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CanonicalError;
use crate::fc::{render_tool_instructions, ToolCallSimulator, ToolInvocation, MARKER_GRAMMAR};
use crate::protocol::anthropic::decoder::decode_anthropic_request;
use crate::protocol::anthropic::encoder::encode_anthropic_response;
use crate::protocol::anthropic::{AnthropicRequest, AnthropicResponse};
use crate::protocol::canonical::{
    CanonicalPart, CanonicalRequest, CanonicalResponse, CanonicalStopReason, CanonicalUsage,
    ImageRef, IngressApi, ToolDefinition,
};
use crate::protocol::mapping::backend_finish_to_canonical;
use crate::protocol::openai_chat::decoder::decode_openai_chat_request;
use crate::protocol::openai_chat::encoder::encode_openai_response;
use crate::protocol::openai_chat::{OpenAiChatRequest, OpenAiChatResponse};
use crate::sanitize::SystemPromptSanitizer;
use crate::upstream::{BackendReply, BackendRequest};
use crate::util::{next_completion_id, next_message_id, random_uuid};

pub(crate) fn invalid(message: impl Into<String>) -> CanonicalError {
    CanonicalError::InvalidRequest(message.into())
}

// ---------------------------------------------------------------------------
// Tool declarations
// ---------------------------------------------------------------------------

/// A declared tool in either the bare `{name, description, input_schema}`
/// shape or the `{type: "function", function: {...}}` wrapper.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ToolDeclaration {
    Function {
        function: FunctionDeclaration,
    },
    Bare {
        name: String,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        input_schema: Option<Value>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Option<Value>,
}

impl From<ToolDeclaration> for ToolDefinition {
    fn from(declaration: ToolDeclaration) -> Self {
        let (name, description, schema) = match declaration {
            ToolDeclaration::Function { function } => {
                (function.name, function.description, function.parameters)
            }
            ToolDeclaration::Bare {
                name,
                description,
                input_schema,
            } => (name, description, input_schema),
        };
        Self {
            name,
            description: description.unwrap_or_default(),
            input_schema: schema
                .unwrap_or_else(|| serde_json::json!({"type": "object", "properties": {}})),
        }
    }
}

/// Unwrap declarations into definitions. Names must be non-empty and unique.
pub(crate) fn decode_tools(
    tools: Option<Vec<ToolDeclaration>>,
) -> Result<Arc<[ToolDefinition]>, CanonicalError> {
    let Some(tools) = tools else {
        return Ok(Arc::from(Vec::new()));
    };
    let mut seen = FxHashSet::default();
    let mut out = Vec::with_capacity(tools.len());
    for (i, declaration) in tools.into_iter().enumerate() {
        let tool = ToolDefinition::from(declaration);
        if tool.name.trim().is_empty() {
            return Err(invalid(format!("tools.{i}.name: Field required")));
        }
        if !seen.insert(tool.name.clone()) {
            return Err(invalid(format!(
                "tools.{i}.name: Tool names must be unique, '{}' is repeated",
                tool.name
            )));
        }
        out.push(tool);
    }
    Ok(out.into())
}

/// Text of a tool result: a string, or the text blocks of an array.
pub(crate) fn tool_result_text(content: Option<Value>) -> String {
    match content {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s,
        Some(Value::Array(items)) => items
            .iter()
            .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        Some(other) => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Client body -> canonical
// ---------------------------------------------------------------------------

fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, CanonicalError> {
    serde_json::from_slice(body).map_err(|err| invalid(format!("Invalid request body: {err}")))
}

/// Decode a client request body for `ingress` into canonical form.
///
/// `model` is left equal to the client's model name; alias resolution
/// happens in routing.
///
/// # Errors
///
/// Returns [`CanonicalError::InvalidRequest`] for malformed JSON or a field
/// that fails validation.
pub fn to_canonical(body: &[u8], ingress: IngressApi) -> Result<CanonicalRequest, CanonicalError> {
    match ingress {
        IngressApi::Anthropic => {
            decode_anthropic_request(parse_body::<AnthropicRequest>(body)?, random_uuid(), true)
        }
        IngressApi::OpenAiChat => {
            decode_openai_chat_request(parse_body::<OpenAiChatRequest>(body)?, random_uuid())
        }
    }
}

/// Decode a `count_tokens` body. Same as a Messages request, minus the
/// `max_tokens` check.
///
/// # Errors
///
/// See [`to_canonical`].
pub fn to_canonical_for_count(body: &[u8]) -> Result<CanonicalRequest, CanonicalError> {
    decode_anthropic_request(parse_body::<AnthropicRequest>(body)?, random_uuid(), false)
}

// ---------------------------------------------------------------------------
// Canonical -> backend
// ---------------------------------------------------------------------------

fn render_parts(parts: &[CanonicalPart], attachments: &mut Vec<ImageRef>) -> String {
    let mut rendered: Vec<String> = Vec::with_capacity(parts.len());
    for part in parts {
        match part {
            CanonicalPart::Text(text) => {
                if !text.is_empty() {
                    rendered.push(text.clone());
                }
            }
            CanonicalPart::Image(image) => attachments.push(image.clone()),
            CanonicalPart::ToolUse { name, input, .. } => {
                rendered.push(MARKER_GRAMMAR.render_call(name, &input.to_string()));
            }
            CanonicalPart::ToolResult {
                content, is_error, ..
            } => {
                if *is_error {
                    rendered.push(MARKER_GRAMMAR.render_result(&format!("Error: {content}")));
                } else {
                    rendered.push(MARKER_GRAMMAR.render_result(content));
                }
            }
            CanonicalPart::Thinking(text) => {
                if !text.is_empty() {
                    rendered.push(MARKER_GRAMMAR.render_thinking(text));
                }
            }
        }
    }
    rendered.join("\n")
}

/// Flatten a (sanitized) canonical request into the backend's single turn:
/// the system text, then one `Role: text` block per message. Tool history is
/// written in the marker grammar; images go to `attachments` in order.
#[must_use]
pub fn render_backend_request(request: &CanonicalRequest) -> BackendRequest {
    let mut message = String::new();
    let mut attachments = Vec::new();

    if let Some(system) = request.system.as_deref() {
        message.push_str(system.trim_end());
    }
    for msg in &request.messages {
        let body = render_parts(&msg.parts, &mut attachments);
        if body.is_empty() {
            continue;
        }
        if !message.is_empty() {
            message.push_str("\n\n");
        }
        message.push_str(msg.role.transcript_label());
        message.push_str(": ");
        message.push_str(&body);
    }

    BackendRequest {
        model: request.model.clone(),
        message,
        attachments,
        tool_protocol_instructions: render_tool_instructions(&request.tools),
        generation: request.generation.clone(),
        stream: request.stream,
    }
}

// ---------------------------------------------------------------------------
// Backend -> client
// ---------------------------------------------------------------------------

/// Response id in the style of `ingress`.
#[must_use]
pub fn response_id(ingress: IngressApi) -> String {
    match ingress {
        IngressApi::Anthropic => next_message_id(),
        IngressApi::OpenAiChat => next_completion_id(),
    }
}

#[must_use]
pub fn canonical_response(reply: BackendReply, ingress: IngressApi) -> CanonicalResponse {
    CanonicalResponse {
        id: response_id(ingress),
        stop_reason: backend_finish_to_canonical(reply.finish_reason.as_deref()),
        text: reply.text,
        usage: reply.usage,
    }
}

/// One finished assistant turn after simulation and scrubbing.
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantTurn {
    pub id: String,
    /// The client's model name, echoed back.
    pub model: String,
    pub text: String,
    pub invocations: Vec<ToolInvocation>,
    pub stop_reason: CanonicalStopReason,
    pub usage: CanonicalUsage,
}

/// A client response body in its protocol's shape.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Anthropic(AnthropicResponse),
    OpenAiChat(OpenAiChatResponse),
}

/// Build the client response for a complete backend turn.
///
/// With declared tools the text goes through the simulator first; any
/// recovered invocation turns the stop reason into tool use. Usage figures
/// are passed through as reported.
#[must_use]
pub fn from_canonical_response(
    response: CanonicalResponse,
    request: &CanonicalRequest,
    sanitizer: &SystemPromptSanitizer,
) -> ResponseBody {
    let simulation =
        ToolCallSimulator::new(&request.tools).parse(&response.text, &request.last_user_text());
    let stop_reason = if simulation.invocations.is_empty() {
        response.stop_reason
    } else {
        CanonicalStopReason::ToolUse
    };
    let turn = AssistantTurn {
        id: response.id,
        model: request.client_model.clone(),
        text: sanitizer.scrub_response(&simulation.text),
        invocations: simulation.invocations,
        stop_reason,
        usage: response.usage,
    };
    match request.ingress_api {
        IngressApi::Anthropic => ResponseBody::Anthropic(encode_anthropic_response(turn)),
        IngressApi::OpenAiChat => ResponseBody::OpenAiChat(encode_openai_response(turn)),
    }
}
