use std::sync::Arc;

use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json, Response};
use bytes::Bytes;

use crate::api::common::prepare_backend_request;
use crate::error::{into_axum_response, CanonicalError};
use crate::observability::token_counter::estimate_backend_tokens;
use crate::protocol::anthropic::AnthropicTokenCount;
use crate::protocol::canonical::IngressApi;
use crate::protocol::transcoder::to_canonical_for_count;
use crate::state::AppState;

/// `POST /v1/messages/count_tokens`: a local estimate over the exact text the
/// backend would receive.
pub async fn handler(state: Arc<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    match count(&state, &headers, &body) {
        Ok(count) => Json(count).into_response(),
        Err(err) => into_axum_response(&err, IngressApi::Anthropic),
    }
}

fn count(
    state: &AppState,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<AnthropicTokenCount, CanonicalError> {
    state.authenticate(headers)?;
    let mut request = to_canonical_for_count(body)?;
    let backend = prepare_backend_request(state, &mut request);
    Ok(AnthropicTokenCount {
        input_tokens: estimate_backend_tokens(&backend),
    })
}
