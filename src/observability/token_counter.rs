use std::time::Duration;

use tracing::info;

use crate::protocol::canonical::CanonicalUsage;
use crate::upstream::BackendRequest;

/// Estimate the number of tokens in `text`.
///
/// Uses a lightweight heuristic (`bytes / 4`, rounded up); the backend's own
/// tokenizer is not available here.
#[must_use]
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64).div_ceil(4)
}

/// Estimate the input tokens of a rendered backend request. The tool
/// instructions are already part of `message`, so they are not added again.
#[must_use]
pub fn estimate_backend_tokens(request: &BackendRequest) -> u64 {
    estimate_tokens(&request.message)
}

/// Log token usage for a completed request at INFO level.
pub fn log_request_usage(model: &str, usage: &CanonicalUsage, duration: Duration) {
    info!(
        model = model,
        input_tokens = usage.input_or_zero(),
        output_tokens = usage.output_or_zero(),
        duration_seconds = duration.as_secs_f64(),
        "request completed"
    );
}
