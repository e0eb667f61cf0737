use std::sync::Arc;
use std::time::Instant;

use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json, Response};
use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::{into_axum_response, CanonicalError};
use crate::observability::log_request_complete;
use crate::protocol::anthropic::stream::AnthropicStreamEncoder;
use crate::protocol::canonical::{CanonicalRequest, IngressApi};
use crate::protocol::openai_chat::stream::OpenAiStreamEncoder;
use crate::protocol::transcoder::{
    canonical_response, from_canonical_response, render_backend_request, response_id,
    to_canonical,
};
use crate::state::AppState;
use crate::stream::{assemble_sse_body, StreamAssembler};
use crate::upstream::BackendRequest;

#[inline]
pub(crate) fn sse_ok_response(body: axum::body::Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = http::StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        http::HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        http::header::CONNECTION,
        http::HeaderValue::from_static("keep-alive"),
    );
    response
}

/// Resolve the backend model, sanitize the system text and render the
/// backend turn for a decoded request.
pub(crate) fn prepare_backend_request(
    state: &AppState,
    request: &mut CanonicalRequest,
) -> BackendRequest {
    request.model = state.models.resolve(&request.client_model).to_string();
    state.sanitizer.apply(request);
    render_backend_request(request)
}

/// Shared handler body for both generation endpoints.
pub(crate) async fn handle_generation(
    state: Arc<AppState>,
    headers: &HeaderMap,
    body: &Bytes,
    ingress: IngressApi,
) -> Response {
    match generate(&state, headers, body, ingress).await {
        Ok(response) => response,
        Err(err) => {
            warn!(
                ingress = ?ingress,
                category = ?err.category(),
                error = %err,
                "request failed"
            );
            into_axum_response(&err, ingress)
        }
    }
}

async fn generate(
    state: &Arc<AppState>,
    headers: &HeaderMap,
    body: &Bytes,
    ingress: IngressApi,
) -> Result<Response, CanonicalError> {
    state.authenticate(headers)?;
    let mut request = to_canonical(body, ingress)?;
    let backend = prepare_backend_request(state, &mut request);
    debug!(
        request_id = %request.request_id,
        client_model = %request.client_model,
        model = %request.model,
        stream = request.stream,
        tools = request.tools.len(),
        attachments = backend.attachments.len(),
        "forwarding request"
    );

    if request.stream {
        let deltas = state.upstream.stream(backend).await?;
        let assembler = StreamAssembler::new(
            &request,
            Arc::clone(&state.sanitizer),
            state.max_buffered_bytes(),
        );
        let id = response_id(ingress);
        let model = request.client_model.clone();
        let body = match ingress {
            IngressApi::Anthropic => {
                assemble_sse_body(deltas, assembler, AnthropicStreamEncoder::new(id, model))
            }
            IngressApi::OpenAiChat => {
                assemble_sse_body(deltas, assembler, OpenAiStreamEncoder::new(id, model))
            }
        };
        return Ok(sse_ok_response(body));
    }

    let started = Instant::now();
    let reply = state.upstream.complete(backend).await?;
    let response = canonical_response(reply, ingress);
    log_request_complete(&request.model, &response.usage, started);
    let body = from_canonical_response(response, &request, &state.sanitizer);
    Ok(Json(body).into_response())
}
