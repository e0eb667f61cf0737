#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post as route_post;
use axum::{Json, Router};
use serde_json::Value;
use toolsim_gateway::config::parse_config;
use toolsim_gateway::routing::dispatch::dispatch_request;
use toolsim_gateway::state::AppState;

pub const CLIENT_KEY: &str = "client-key";

/// Every body the mock backend received, in order.
pub type Captured = Arc<Mutex<Vec<Value>>>;

pub struct MockBackend {
    pub base_url: String,
    pub captured: Captured,
    server: tokio::task::JoinHandle<()>,
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.server.abort();
    }
}

impl MockBackend {
    pub fn last_body(&self) -> Value {
        self.captured
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("backend was called")
    }

    pub fn calls(&self) -> usize {
        self.captured.lock().unwrap().len()
    }
}

#[derive(Clone)]
pub enum Reply {
    /// A chat completion whose message content is the given text.
    Text(String),
    /// An SSE stream of content deltas followed by a usage chunk and `[DONE]`.
    Stream(Vec<String>),
    /// Raw SSE text, sent as is.
    RawSse(String),
    Status(StatusCode, Value),
}

pub fn completion_json(text: &str) -> Value {
    serde_json::json!({
        "id": "chatcmpl-backend",
        "object": "chat.completion",
        "model": "grok-3",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": text},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 11, "completion_tokens": 7, "total_tokens": 18}
    })
}

pub fn sse_deltas(deltas: &[String]) -> String {
    let mut out = String::new();
    for delta in deltas {
        let chunk = serde_json::json!({
            "choices": [{"index": 0, "delta": {"content": delta}, "finish_reason": null}]
        });
        out.push_str(&format!("data: {chunk}\n\n"));
    }
    let finish = serde_json::json!({
        "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}],
        "usage": {"prompt_tokens": 11, "completion_tokens": 7}
    });
    out.push_str(&format!("data: {finish}\n\n"));
    out.push_str("data: [DONE]\n\n");
    out
}

fn sse_response(body: String) -> Response {
    (
        [(axum::http::header::CONTENT_TYPE, "text/event-stream")],
        body,
    )
        .into_response()
}

pub async fn spawn_backend(reply: Reply) -> MockBackend {
    let captured: Captured = Arc::default();
    let sink = Arc::clone(&captured);
    let app = Router::new().route(
        "/v1/chat/completions",
        route_post(move |Json(body): Json<Value>| {
            let reply = reply.clone();
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push(body);
                match reply {
                    Reply::Text(text) => Json(completion_json(&text)).into_response(),
                    Reply::Stream(deltas) => sse_response(sse_deltas(&deltas)),
                    Reply::RawSse(raw) => sse_response(raw),
                    Reply::Status(status, body) => (status, Json(body)).into_response(),
                }
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock backend");
    let addr = listener.local_addr().expect("local addr");
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    MockBackend {
        base_url: format!("http://{addr}"),
        captured,
        server,
    }
}

pub fn config_yaml(base_url: &str, extra: &str) -> String {
    format!(
        "backend:\n  base_url: \"{base_url}\"\n  api_key: backend-secret\n\
         models:\n  default_model: grok-3\n  aliases:\n    claude-sonnet-4: grok-3\n    gpt-4o: grok-3-mini\n\
         client_authentication:\n  allowed_keys: [\"{CLIENT_KEY}\"]\n{extra}"
    )
}

pub fn build_state(base_url: &str) -> Arc<AppState> {
    build_state_with(base_url, "")
}

pub fn build_state_with(base_url: &str, extra: &str) -> Arc<AppState> {
    let config = parse_config(&config_yaml(base_url, extra)).expect("valid config");
    Arc::new(AppState::from_config(config).expect("state"))
}

pub async fn send(
    state: Arc<AppState>,
    method: &str,
    uri: &str,
    key: Option<&str>,
    body: Option<Value>,
) -> Response {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(key) = key {
        builder = builder.header("authorization", format!("Bearer {key}"));
    }
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&value).expect("serialize request"))
        }
        None => Body::empty(),
    };
    let request = builder.body(body).expect("build request");
    dispatch_request(state, Arc::<str>::from(""), request)
        .await
        .expect("dispatch")
}

pub async fn post(state: Arc<AppState>, uri: &str, body: Value) -> Response {
    send(state, "POST", uri, Some(CLIENT_KEY), Some(body)).await
}

pub async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}

pub async fn body_json(response: Response) -> Value {
    serde_json::from_str(&body_text(response).await).expect("json payload")
}

/// `(event name, data)` for each frame of an SSE body. `[DONE]` comes back as
/// a string value.
pub fn sse_frames(text: &str) -> Vec<(Option<String>, Value)> {
    text.split("\n\n")
        .filter(|frame| !frame.trim().is_empty())
        .map(|frame| {
            let mut event = None;
            let mut data = String::new();
            for line in frame.lines() {
                if let Some(name) = line.strip_prefix("event: ") {
                    event = Some(name.to_string());
                } else if let Some(payload) = line.strip_prefix("data: ") {
                    data.push_str(payload);
                }
            }
            let value = serde_json::from_str(&data).unwrap_or(Value::String(data));
            (event, value)
        })
        .collect()
}
