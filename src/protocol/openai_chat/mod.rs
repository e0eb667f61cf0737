pub mod decoder;
pub mod encoder;
pub mod stream;

use serde::{Deserialize, Serialize};

use super::transcoder::ToolDeclaration;

/// `OpenAI` Chat Completion request wire type.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenAiChatRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub messages: Vec<OpenAiMessage>,
    #[serde(default)]
    pub tools: Option<Vec<ToolDeclaration>>,
    #[serde(default)]
    pub stream: Option<bool>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u64>,
    #[serde(default)]
    pub max_completion_tokens: Option<u64>,
}

/// `OpenAI` message wire type, shared by requests and responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenAiMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<OpenAiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

fn function_type() -> String {
    "function".to_string()
}

/// A tool call within a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAiToolCall {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub type_: String,
    pub function: OpenAiToolCallFunction,
}

/// The function part of a tool call. `arguments` is a JSON object string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAiToolCallFunction {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

/// `OpenAI` Chat Completion response wire type.
#[derive(Debug, Clone, Serialize)]
pub struct OpenAiChatResponse {
    pub id: String,
    pub object: &'static str,
    pub created: u64,
    pub model: String,
    pub choices: Vec<OpenAiChoice>,
    pub usage: OpenAiUsage,
}

/// A single choice in the response.
#[derive(Debug, Clone, Serialize)]
pub struct OpenAiChoice {
    pub index: u32,
    pub message: OpenAiMessage,
    pub finish_reason: &'static str,
}

/// Usage info in the response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OpenAiUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// A streaming chunk.
#[derive(Debug, Clone, Serialize)]
pub struct OpenAiStreamChunk<'a> {
    pub id: &'a str,
    pub object: &'static str,
    pub created: u64,
    pub model: &'a str,
    pub choices: [OpenAiStreamChoice<'a>; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<OpenAiUsage>,
}

/// A choice within a stream chunk.
#[derive(Debug, Clone, Serialize)]
pub struct OpenAiStreamChoice<'a> {
    pub index: u32,
    pub delta: OpenAiDelta<'a>,
    pub finish_reason: Option<&'static str>,
}

/// Delta content within a stream choice.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OpenAiDelta<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<[OpenAiStreamToolCall<'a>; 1]>,
}

/// One complete tool call in a stream chunk.
#[derive(Debug, Clone, Serialize)]
pub struct OpenAiStreamToolCall<'a> {
    pub index: u32,
    pub id: &'a str,
    #[serde(rename = "type")]
    pub type_: &'static str,
    pub function: OpenAiStreamToolCallFunction<'a>,
}

/// Function body of a streamed tool call.
#[derive(Debug, Clone, Serialize)]
pub struct OpenAiStreamToolCallFunction<'a> {
    pub name: &'a str,
    pub arguments: &'a str,
}
