pub mod token_counter;

use crate::protocol::canonical::CanonicalUsage;
use tracing_subscriber::EnvFilter;

/// Map a configured log level onto a tracing filter directive.
///
/// `None` means logging is disabled. Unknown levels fall back to INFO.
#[must_use]
pub fn filter_directive(log_level: &str) -> Option<&'static str> {
    match log_level.to_uppercase().as_str() {
        "DISABLED" => None,
        "DEBUG" => Some("debug"),
        "WARNING" | "WARN" => Some("warn"),
        "ERROR" | "CRITICAL" => Some("error"),
        _ => Some("info"),
    }
}

/// Initialize the tracing subscriber with the configured log level.
///
/// `RUST_LOG`, when set, takes precedence over the configured level.
pub fn init_tracing(log_level: &str) {
    let Some(directive) = filter_directive(log_level) else {
        return;
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}

/// Log token usage for a completed request, computing duration from start time.
pub fn log_request_complete(model: &str, usage: &CanonicalUsage, start_time: std::time::Instant) {
    token_counter::log_request_usage(model, usage, start_time.elapsed());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_map_to_directives() {
        assert_eq!(filter_directive("DISABLED"), None);
        assert_eq!(filter_directive("warning"), Some("warn"));
        assert_eq!(filter_directive("CRITICAL"), Some("error"));
        assert_eq!(filter_directive("DEBUG"), Some("debug"));
        assert_eq!(filter_directive("nonsense"), Some("info"));
    }
}
