use std::sync::Arc;

use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// Health check handler.
/// Returns JSON with status and a config summary.
pub fn health_handler(state: &Arc<AppState>) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "config": {
            "default_model": state.models.default_model(),
            "aliases_count": config.models.aliases.len(),
            "client_keys_count": config.client_authentication.allowed_keys.len(),
            "features": {
                "log_level": config.features.log_level,
                "sanitize_system_prompt": config.features.sanitize_system_prompt,
                "scrub_responses": config.features.scrub_responses,
                "max_buffered_bytes": config.features.max_buffered_bytes,
            }
        }
    }))
}
