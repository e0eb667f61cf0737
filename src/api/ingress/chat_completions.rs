use std::sync::Arc;

use axum::http::HeaderMap;
use axum::response::Response;
use bytes::Bytes;

use crate::api::common::handle_generation;
use crate::protocol::canonical::IngressApi;
use crate::state::AppState;

/// `POST /v1/chat/completions`.
pub async fn handler(state: Arc<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    handle_generation(state, &headers, &body, IngressApi::OpenAiChat).await
}
