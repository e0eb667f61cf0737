use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{self, Body};
use axum::http::{Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::api::{chat_completions, count_tokens, health, messages, models};
use crate::state::AppState;

enum RouteMatch {
    Health,
    Models,
    Messages,
    CountTokens,
    ChatCompletions,
    MethodNotAllowed,
    NotFound,
}

/// Dispatch a raw HTTP request to the matching handler.
///
/// # Errors
///
/// This function currently never returns `Err` and uses `Infallible`.
pub async fn dispatch_request(
    state: Arc<AppState>,
    base_path: Arc<str>,
    request: Request<Body>,
) -> Result<Response, Infallible> {
    let (parts, body) = request.into_parts();
    let route = match_route(&parts.method, parts.uri.path(), base_path.as_ref());
    let body_limit = state.config.server.body_limit_bytes;

    let response = match route {
        RouteMatch::Health => health::health_handler(&state).into_response(),
        RouteMatch::Models => models::handler(&state, &parts.headers),
        RouteMatch::Messages => {
            let body_bytes = match read_request_body(body, body_limit).await {
                Ok(bytes) => bytes,
                Err(response) => return Ok(response),
            };
            messages::handler(state, parts.headers, body_bytes).await
        }
        RouteMatch::CountTokens => {
            let body_bytes = match read_request_body(body, body_limit).await {
                Ok(bytes) => bytes,
                Err(response) => return Ok(response),
            };
            count_tokens::handler(state, parts.headers, body_bytes).await
        }
        RouteMatch::ChatCompletions => {
            let body_bytes = match read_request_body(body, body_limit).await {
                Ok(bytes) => bytes,
                Err(response) => return Ok(response),
            };
            chat_completions::handler(state, parts.headers, body_bytes).await
        }
        RouteMatch::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED.into_response(),
        RouteMatch::NotFound => StatusCode::NOT_FOUND.into_response(),
    };

    Ok(response)
}

#[must_use]
pub fn normalize_base_path(base_path: &str) -> String {
    let trimmed = base_path.trim();
    if trimmed.is_empty() || trimmed == "/" {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.trim_end_matches('/').to_string()
    } else {
        format!("/{}", trimmed.trim_end_matches('/'))
    }
}

async fn read_request_body(body: Body, limit: usize) -> Result<bytes::Bytes, Response> {
    body::to_bytes(body, limit).await.map_err(|_| {
        (
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("Request body too large (max {limit} bytes)"),
        )
            .into_response()
    })
}

fn route_for(method: &Method, expected: &Method, route: RouteMatch) -> RouteMatch {
    if method == expected {
        route
    } else {
        RouteMatch::MethodNotAllowed
    }
}

fn match_route(method: &Method, path: &str, base_path: &str) -> RouteMatch {
    let Some(path) = strip_base_path(path, base_path) else {
        return RouteMatch::NotFound;
    };

    match path {
        "/" | "/health" => route_for(method, &Method::GET, RouteMatch::Health),
        "/v1/models" => route_for(method, &Method::GET, RouteMatch::Models),
        "/v1/messages" => route_for(method, &Method::POST, RouteMatch::Messages),
        "/v1/messages/count_tokens" => route_for(method, &Method::POST, RouteMatch::CountTokens),
        "/v1/chat/completions" => route_for(method, &Method::POST, RouteMatch::ChatCompletions),
        _ => RouteMatch::NotFound,
    }
}

fn strip_base_path<'a>(path: &'a str, base_path: &str) -> Option<&'a str> {
    if base_path.is_empty() {
        return Some(path);
    }

    let remainder = path.strip_prefix(base_path)?;
    if remainder.is_empty() {
        Some("/")
    } else if remainder.starts_with('/') {
        Some(remainder)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_path_is_normalized() {
        assert_eq!(normalize_base_path(""), "");
        assert_eq!(normalize_base_path("/"), "");
        assert_eq!(normalize_base_path("gw/"), "/gw");
        assert_eq!(normalize_base_path(" /gw// "), "/gw");
    }

    #[test]
    fn base_path_must_match_whole_segment() {
        assert_eq!(strip_base_path("/gw/v1/messages", "/gw"), Some("/v1/messages"));
        assert_eq!(strip_base_path("/gw", "/gw"), Some("/"));
        assert_eq!(strip_base_path("/gwx/v1/messages", "/gw"), None);
    }

    #[test]
    fn routes_check_method() {
        assert!(matches!(
            match_route(&Method::POST, "/v1/messages/count_tokens", ""),
            RouteMatch::CountTokens
        ));
        assert!(matches!(
            match_route(&Method::GET, "/v1/chat/completions", ""),
            RouteMatch::MethodNotAllowed
        ));
        assert!(matches!(
            match_route(&Method::GET, "/health", ""),
            RouteMatch::Health
        ));
        assert!(matches!(
            match_route(&Method::POST, "/v1/responses", ""),
            RouteMatch::NotFound
        ));
    }
}
