use std::sync::Arc;

use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json, Response};
use serde_json::{json, Value};

use crate::error::into_axum_response;
use crate::protocol::canonical::IngressApi;
use crate::state::AppState;

const MODEL_CREATED: u64 = 1_677_610_602;

/// Client-visible model ids in `OpenAI` list format.
#[must_use]
pub fn models_response_body(state: &AppState) -> Value {
    let data: Vec<Value> = state
        .models
        .listed_models()
        .iter()
        .map(|id| {
            json!({
                "id": &**id,
                "object": "model",
                "created": MODEL_CREATED,
                "owned_by": env!("CARGO_PKG_NAME"),
            })
        })
        .collect();
    json!({ "object": "list", "data": data })
}

/// `GET /v1/models`.
pub fn handler(state: &Arc<AppState>, headers: &HeaderMap) -> Response {
    if let Err(err) = state.authenticate(headers) {
        return into_axum_response(&err, IngressApi::OpenAiChat);
    }
    Json(models_response_body(state)).into_response()
}
