use crate::config::AppConfig;
use crate::error::CanonicalError;
use http::header::{HeaderName, AUTHORIZATION};
use rustc_hash::FxHashSet;

const X_API_KEY: HeaderName = HeaderName::from_static("x-api-key");

/// Compact key index used in hot-path authentication.
pub enum AllowedClientKeys {
    Empty,
    Single(Box<str>),
    Multiple(FxHashSet<String>),
}

/// Extract the client key from request headers.
///
/// Both ingresses accept `Authorization: Bearer <key>` and `x-api-key: <key>`;
/// the bearer form wins when both are present.
///
/// # Errors
///
/// Returns `CanonicalError::Auth` when neither header carries a key.
pub fn extract_api_key(headers: &http::HeaderMap) -> Result<&str, CanonicalError> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .or_else(|| headers.get(X_API_KEY).and_then(|v| v.to_str().ok()))
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .ok_or_else(|| CanonicalError::Auth("Missing API key".to_string()))
}

/// Authenticate an incoming request against the pre-indexed `allowed_keys`.
/// An empty index lets every request through.
///
/// # Errors
///
/// Returns `CanonicalError::Auth` when the API key is missing or invalid.
pub fn authenticate(
    headers: &http::HeaderMap,
    allowed_keys: &AllowedClientKeys,
) -> Result<(), CanonicalError> {
    let accepted = match allowed_keys {
        AllowedClientKeys::Empty => return Ok(()),
        AllowedClientKeys::Single(key) => extract_api_key(headers)? == key.as_ref(),
        AllowedClientKeys::Multiple(set) => set.contains(extract_api_key(headers)?),
    };
    if accepted {
        Ok(())
    } else {
        Err(CanonicalError::Auth("Invalid API key".to_string()))
    }
}

/// Build a hash-set index for allowed client keys.
#[must_use]
pub fn build_allowed_key_set(config: &AppConfig) -> AllowedClientKeys {
    let mut allowed_set: FxHashSet<String> = config
        .client_authentication
        .allowed_keys
        .iter()
        .cloned()
        .collect();

    match allowed_set.len() {
        0 => AllowedClientKeys::Empty,
        1 => match allowed_set.drain().next() {
            Some(single_key) => AllowedClientKeys::Single(single_key.into_boxed_str()),
            None => AllowedClientKeys::Empty,
        },
        _ => AllowedClientKeys::Multiple(allowed_set),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        AppConfig, BackendConfig, ClientAuthConfig, FeaturesConfig, ModelsConfig, ServerConfig,
    };

    fn make_config(allowed_keys: Vec<String>) -> AppConfig {
        AppConfig {
            server: ServerConfig::default(),
            backend: BackendConfig {
                base_url: "http://127.0.0.1:9000".to_string(),
                api_key: None,
                chat_path: "/v1/chat/completions".to_string(),
                proxy: None,
            },
            models: ModelsConfig {
                default_model: "grok-3".to_string(),
                aliases: Default::default(),
            },
            client_authentication: ClientAuthConfig { allowed_keys },
            features: FeaturesConfig::default(),
        }
    }

    fn headers(pairs: &[(&'static str, &str)]) -> http::HeaderMap {
        let mut headers = http::HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(*name, value.parse().unwrap());
        }
        headers
    }

    #[test]
    fn test_extract_bearer() {
        let h = headers(&[("authorization", "Bearer sk-test123")]);
        assert_eq!(extract_api_key(&h).unwrap(), "sk-test123");
    }

    #[test]
    fn test_extract_x_api_key() {
        let h = headers(&[("x-api-key", "ant-key789")]);
        assert_eq!(extract_api_key(&h).unwrap(), "ant-key789");
    }

    #[test]
    fn test_bearer_preferred_over_x_api_key() {
        let h = headers(&[("authorization", "Bearer preferred"), ("x-api-key", "other")]);
        assert_eq!(extract_api_key(&h).unwrap(), "preferred");
    }

    #[test]
    fn test_extract_missing_key() {
        let err = extract_api_key(&http::HeaderMap::new()).unwrap_err();
        assert!(matches!(err, CanonicalError::Auth(ref m) if m == "Missing API key"));
    }

    #[test]
    fn test_authenticate_valid_and_invalid() {
        let index = build_allowed_key_set(&make_config(vec!["valid-key".to_string()]));
        assert!(authenticate(&headers(&[("x-api-key", "valid-key")]), &index).is_ok());
        let err = authenticate(&headers(&[("authorization", "Bearer wrong")]), &index).unwrap_err();
        assert!(matches!(err, CanonicalError::Auth(ref m) if m == "Invalid API key"));
    }

    #[test]
    fn test_empty_index_skips_check() {
        let index = build_allowed_key_set(&make_config(vec![]));
        assert!(matches!(index, AllowedClientKeys::Empty));
        assert!(authenticate(&http::HeaderMap::new(), &index).is_ok());
    }

    #[test]
    fn test_build_allowed_key_set_multiple() {
        let index =
            build_allowed_key_set(&make_config(vec!["a".into(), "b".into(), "a".into()]));
        match index {
            AllowedClientKeys::Multiple(set) => assert_eq!(set.len(), 2),
            _ => panic!("expected multiple-key index"),
        }
    }

    #[test]
    fn test_build_allowed_key_set_single() {
        let index = build_allowed_key_set(&make_config(vec!["one".into(), "one".into()]));
        assert!(matches!(index, AllowedClientKeys::Single(ref k) if k.as_ref() == "one"));
    }
}
