use std::sync::Once;
use std::time::Duration;

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::{BackendConfig, ServerConfig};
use crate::error::CanonicalError;
use crate::protocol::canonical::CanonicalUsage;
use crate::stream::sse::sse_frame_stream;
use crate::stream::SseEvent;

use super::{BackendDelta, BackendReply, BackendRequest, DeltaStream, UpstreamClient};

static RUSTLS_PROVIDER_INIT: Once = Once::new();

/// Upstream error bodies are cut to this many characters before surfacing.
const MAX_ERROR_BODY_CHARS: usize = 512;

fn build_reqwest_client(
    server: &ServerConfig,
    proxy_url: Option<&str>,
) -> Result<reqwest::Client, CanonicalError> {
    let pool_idle_timeout = if server.http_pool_idle_timeout_secs == 0 {
        None
    } else {
        Some(Duration::from_secs(server.http_pool_idle_timeout_secs))
    };

    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(server.http_pool_max_idle_per_host.max(1))
        .pool_idle_timeout(pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(Duration::from_secs(5))
        .redirect(reqwest::redirect::Policy::none())
        .timeout(Duration::from_secs(server.timeout));

    if let Some(proxy_url) = proxy_url {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|err| CanonicalError::Transport(format!("Invalid proxy URL: {err}")))?;
        builder = builder.no_proxy().proxy(proxy);
    } else {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| CanonicalError::Transport(format!("Failed to build HTTP client: {err}")))
}

/// [`UpstreamClient`] for an OpenAI-compatible chat endpoint that only
/// returns text.
pub struct HttpUpstream {
    client: reqwest::Client,
    endpoint: url::Url,
    api_key: Option<String>,
}

impl HttpUpstream {
    /// # Errors
    ///
    /// Returns [`CanonicalError::Config`] when the endpoint URL is invalid and
    /// [`CanonicalError::Transport`] when the HTTP client cannot be built.
    pub fn new(backend: &BackendConfig, server: &ServerConfig) -> Result<Self, CanonicalError> {
        RUSTLS_PROVIDER_INIT.call_once(|| {
            let _ = rustls::crypto::ring::default_provider().install_default();
        });

        let raw = format!(
            "{}{}",
            backend.base_url.trim().trim_end_matches('/'),
            backend.chat_path
        );
        let endpoint = url::Url::parse(&raw)
            .map_err(|err| CanonicalError::Config(format!("backend endpoint {raw:?}: {err}")))?;
        let client = build_reqwest_client(server, backend.proxy.as_deref())?;
        Ok(Self {
            client,
            endpoint,
            api_key: backend.api_key.clone(),
        })
    }

    async fn send(&self, request: &BackendRequest) -> Result<reqwest::Response, CanonicalError> {
        let mut builder = self
            .client
            .post(self.endpoint.clone())
            .json(&build_payload(request));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        if request.stream {
            builder = builder.header(http::header::ACCEPT, "text/event-stream");
        }

        let response = builder.send().await.map_err(|err| {
            tracing::error!(model = %request.model, error = %err, "backend request failed");
            CanonicalError::Transport(format!("backend request failed: {err}"))
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = upstream_error_message(&body);
        tracing::error!(
            model = %request.model,
            status = status.as_u16(),
            message = %message,
            "backend returned an error"
        );
        Err(CanonicalError::Upstream {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait::async_trait]
impl UpstreamClient for HttpUpstream {
    async fn complete(&self, request: BackendRequest) -> Result<BackendReply, CanonicalError> {
        let response = self.send(&request).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|err| CanonicalError::Transport(format!("backend body read failed: {err}")))?;
        parse_completion(&bytes)
    }

    async fn stream(&self, request: BackendRequest) -> Result<DeltaStream, CanonicalError> {
        let response = self.send(&request).await?;
        Ok(delta_stream(sse_frame_stream(response.bytes_stream()).boxed()))
    }
}

// ---------------------------------------------------------------------------
// Outbound payload
// ---------------------------------------------------------------------------

/// One user turn: plain text, or a text part followed by `image_url` parts.
fn build_payload(request: &BackendRequest) -> Value {
    let content = if request.attachments.is_empty() {
        Value::String(request.message.clone())
    } else {
        let mut parts = Vec::with_capacity(request.attachments.len() + 1);
        parts.push(json!({"type": "text", "text": request.message}));
        parts.extend(
            request
                .attachments
                .iter()
                .map(|image| json!({"type": "image_url", "image_url": {"url": image.url}})),
        );
        Value::Array(parts)
    };

    let mut payload = json!({
        "model": request.model,
        "messages": [{"role": "user", "content": content}],
        "stream": request.stream,
    });
    if request.stream {
        payload["stream_options"] = json!({"include_usage": true});
    }
    let generation = &request.generation;
    if let Some(max_tokens) = generation.max_tokens {
        payload["max_tokens"] = json!(max_tokens);
    }
    if let Some(temperature) = generation.temperature {
        payload["temperature"] = json!(temperature);
    }
    if let Some(top_p) = generation.top_p {
        payload["top_p"] = json!(top_p);
    }
    payload
}

// ---------------------------------------------------------------------------
// Inbound parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct WireBody {
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct WireChoice {
    #[serde(default)]
    message: Option<WireMessage>,
    #[serde(default)]
    delta: Option<WireMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default, alias = "input_tokens")]
    prompt_tokens: Option<u64>,
    #[serde(default, alias = "output_tokens")]
    completion_tokens: Option<u64>,
}

impl From<WireUsage> for CanonicalUsage {
    fn from(usage: WireUsage) -> Self {
        Self {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        }
    }
}

fn in_band_error(error: &Value) -> CanonicalError {
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .map_or_else(|| error.to_string(), str::to_string);
    let status = error
        .get("code")
        .and_then(Value::as_u64)
        .and_then(|code| u16::try_from(code).ok())
        .filter(|code| (400..600).contains(code))
        .unwrap_or(500);
    CanonicalError::Upstream { status, message }
}

fn parse_completion(bytes: &[u8]) -> Result<BackendReply, CanonicalError> {
    let body: WireBody = serde_json::from_slice(bytes)
        .map_err(|err| CanonicalError::Translation(format!("backend reply is not JSON: {err}")))?;
    if let Some(error) = &body.error {
        return Err(in_band_error(error));
    }

    let mut reply = BackendReply {
        usage: body.usage.map(CanonicalUsage::from).unwrap_or_default(),
        ..BackendReply::default()
    };
    for choice in body.choices.into_iter().take(1) {
        reply.finish_reason = choice.finish_reason;
        if let Some(content) = choice.message.and_then(|m| m.content) {
            reply.text = content;
        }
    }
    Ok(reply)
}

/// Pull a readable message out of an error body, falling back to the raw text.
fn upstream_error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        let message = value
            .pointer("/error/message")
            .or_else(|| value.get("message"))
            .or_else(|| value.get("error"))
            .and_then(Value::as_str);
        if let Some(message) = message {
            return message.to_string();
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "backend returned an empty error body".to_string();
    }
    trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect()
}

struct DeltaState {
    events: BoxStream<'static, Result<SseEvent, reqwest::Error>>,
    finish_reason: Option<String>,
    usage: CanonicalUsage,
    done: bool,
}

/// Turn the backend's SSE chunks into text deltas and one final `Finish`.
///
/// Chunks that do not parse are skipped. A transport failure or an in-band
/// error ends the stream with an `Err` and no `Finish`.
fn delta_stream(events: BoxStream<'static, Result<SseEvent, reqwest::Error>>) -> DeltaStream {
    let state = DeltaState {
        events,
        finish_reason: None,
        usage: CanonicalUsage::default(),
        done: false,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        if state.done {
            return None;
        }
        loop {
            let event = match state.events.next().await {
                Some(Ok(event)) => event,
                Some(Err(err)) => {
                    state.done = true;
                    let err = CanonicalError::Transport(format!("backend stream interrupted: {err}"));
                    return Some((Err(err), state));
                }
                None => break,
            };

            let data = event.data.trim();
            if data == "[DONE]" {
                break;
            }
            if data.is_empty() {
                continue;
            }
            let chunk: WireBody = match serde_json::from_str(data) {
                Ok(chunk) => chunk,
                Err(err) => {
                    tracing::debug!(error = %err, "skipping malformed backend chunk");
                    continue;
                }
            };
            if let Some(error) = &chunk.error {
                state.done = true;
                return Some((Err(in_band_error(error)), state));
            }
            if let Some(usage) = chunk.usage {
                state.usage = usage.into();
            }

            let mut text = String::new();
            for choice in chunk.choices {
                if choice.finish_reason.is_some() {
                    state.finish_reason = choice.finish_reason;
                }
                if let Some(content) = choice.delta.or(choice.message).and_then(|m| m.content) {
                    text.push_str(&content);
                }
            }
            if !text.is_empty() {
                return Some((Ok(BackendDelta::Text(text)), state));
            }
        }

        state.done = true;
        let finish = BackendDelta::Finish {
            finish_reason: state.finish_reason.take(),
            usage: state.usage,
        };
        Some((Ok(finish), state))
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::canonical::{GenerationParams, ImageRef};

    fn request(stream: bool) -> BackendRequest {
        BackendRequest {
            model: "grok-3".to_string(),
            message: "User: hi".to_string(),
            attachments: Vec::new(),
            tool_protocol_instructions: String::new(),
            generation: GenerationParams::default(),
            stream,
        }
    }

    fn events(frames: &[&str]) -> BoxStream<'static, Result<SseEvent, reqwest::Error>> {
        let items: Vec<Result<SseEvent, reqwest::Error>> = frames
            .iter()
            .map(|data| {
                Ok(SseEvent {
                    data: (*data).to_string(),
                    ..SseEvent::default()
                })
            })
            .collect();
        futures_util::stream::iter(items).boxed()
    }

    #[test]
    fn payload_is_single_user_turn() {
        let payload = build_payload(&request(false));
        assert_eq!(payload["messages"][0]["role"], "user");
        assert_eq!(payload["messages"][0]["content"], "User: hi");
        assert!(payload.get("stream_options").is_none());
        assert!(payload.get("temperature").is_none());
        assert!(payload.get("max_tokens").is_none());
    }

    #[test]
    fn sampling_params_are_forwarded_when_set() {
        let mut req = request(false);
        req.generation = GenerationParams {
            max_tokens: Some(256),
            temperature: Some(0.5),
            top_p: None,
        };
        let payload = build_payload(&req);
        assert_eq!(payload["max_tokens"], 256);
        assert_eq!(payload["temperature"], 0.5);
        assert!(payload.get("top_p").is_none());
    }

    #[test]
    fn attachments_become_image_parts() {
        let mut req = request(true);
        req.attachments.push(ImageRef {
            url: "data:image/png;base64,AAAA".to_string(),
            media_type: Some("image/png".to_string()),
        });
        let payload = build_payload(&req);
        let content = &payload["messages"][0]["content"];
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[1]["image_url"]["url"], "data:image/png;base64,AAAA");
        assert_eq!(payload["stream_options"]["include_usage"], true);
    }

    #[test]
    fn completion_parses_text_and_usage() {
        let body = br#"{"choices":[{"message":{"content":"hello"},"finish_reason":"length"}],
            "usage":{"prompt_tokens":7,"completion_tokens":3}}"#;
        let reply = parse_completion(body).unwrap();
        assert_eq!(reply.text, "hello");
        assert_eq!(reply.finish_reason.as_deref(), Some("length"));
        assert_eq!(reply.usage.input_tokens, Some(7));
        assert_eq!(reply.usage.output_tokens, Some(3));
    }

    #[test]
    fn in_band_error_surfaces_as_upstream() {
        let err = parse_completion(br#"{"error":{"message":"quota","code":429}}"#).unwrap_err();
        assert!(matches!(err, CanonicalError::Upstream { status: 429, .. }));
    }

    #[test]
    fn error_message_prefers_structured_field() {
        assert_eq!(upstream_error_message(r#"{"error":{"message":"nope"}}"#), "nope");
        assert_eq!(upstream_error_message("  plain failure "), "plain failure");
        assert_eq!(
            upstream_error_message(""),
            "backend returned an empty error body"
        );
    }

    #[tokio::test]
    async fn malformed_chunks_are_skipped() {
        let stream = delta_stream(events(&[
            r#"{"choices":[{"delta":{"content":"Hel"}}]}"#,
            "{not json",
            r#"{"choices":[{"delta":{"content":"lo"},"finish_reason":"stop"}]}"#,
            r#"{"choices":[],"usage":{"prompt_tokens":5,"completion_tokens":2}}"#,
            "[DONE]",
        ]));
        let deltas: Vec<BackendDelta> = stream.map(|item| item.unwrap()).collect().await;
        assert_eq!(
            deltas,
            vec![
                BackendDelta::Text("Hel".to_string()),
                BackendDelta::Text("lo".to_string()),
                BackendDelta::Finish {
                    finish_reason: Some("stop".to_string()),
                    usage: CanonicalUsage {
                        input_tokens: Some(5),
                        output_tokens: Some(2),
                    },
                },
            ]
        );
    }

    #[tokio::test]
    async fn in_band_stream_error_ends_stream() {
        let stream = delta_stream(events(&[
            r#"{"choices":[{"delta":{"content":"x"}}]}"#,
            r#"{"error":{"message":"overloaded"}}"#,
            r#"{"choices":[{"delta":{"content":"never"}}]}"#,
        ]));
        let items: Vec<Result<BackendDelta, CanonicalError>> = stream.collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[1].is_err());
    }
}
