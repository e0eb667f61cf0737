use rustc_hash::FxHashSet;

use super::{AppConfig, ConfigError};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_allowed_keys(config)?;
    validate_backend(config)?;
    validate_models(config)?;
    validate_features(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if server.http_pool_max_idle_per_host == 0 {
        return Err(validation_err(
            "server.http_pool_max_idle_per_host must be greater than 0",
        ));
    }
    if server.timeout == 0 {
        return Err(validation_err("server.timeout must be greater than 0"));
    }
    if server.body_limit_bytes == 0 {
        return Err(validation_err("server.body_limit_bytes must be greater than 0"));
    }
    if server.runtime_worker_threads == Some(0) {
        return Err(validation_err(
            "server.runtime_worker_threads must be greater than 0 when set",
        ));
    }
    Ok(())
}

fn validate_allowed_keys(config: &AppConfig) -> Result<(), ConfigError> {
    let mut seen = FxHashSet::default();
    for key in &config.client_authentication.allowed_keys {
        if key.trim().is_empty() {
            return Err(validation_err("allowed_keys contains an empty key"));
        }
        if !seen.insert(key.as_str()) {
            return Err(validation_err("allowed_keys contains a duplicate key"));
        }
    }
    Ok(())
}

fn validate_http_url(field_name: &str, value: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(value.trim())
        .map_err(|err| validation_err(format!("{field_name} is not a valid URL: {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(validation_err(format!(
            "{field_name} must use http:// or https://"
        )));
    }
    Ok(())
}

fn validate_backend(config: &AppConfig) -> Result<(), ConfigError> {
    let backend = &config.backend;
    validate_http_url("backend.base_url", &backend.base_url)?;
    if !backend.chat_path.starts_with('/') {
        return Err(validation_err("backend.chat_path must start with '/'"));
    }
    if let Some(key) = &backend.api_key {
        if key.trim().is_empty() {
            return Err(validation_err("backend.api_key cannot be empty when set"));
        }
    }
    if let Some(proxy) = &backend.proxy {
        if proxy.trim().is_empty() {
            return Err(validation_err("backend.proxy cannot be empty when set"));
        }
        validate_http_url("backend.proxy", proxy)?;
    }
    Ok(())
}

fn validate_models(config: &AppConfig) -> Result<(), ConfigError> {
    let models = &config.models;
    if models.default_model.trim().is_empty() {
        return Err(validation_err("models.default_model cannot be empty"));
    }
    for (alias, target) in &models.aliases {
        if alias.trim().is_empty() || target.trim().is_empty() {
            return Err(validation_err(format!(
                "Invalid alias '{alias}' -> '{target}'. Both sides must not be empty."
            )));
        }
    }
    Ok(())
}

fn validate_features(config: &AppConfig) -> Result<(), ConfigError> {
    let features = &config.features;
    let valid_levels = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];
    if !valid_levels.contains(&features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    if features.max_buffered_bytes < 1024 {
        return Err(validation_err(
            "features.max_buffered_bytes must be at least 1024",
        ));
    }
    for pattern in &features.denylist_extra {
        if let Err(err) = regex_lite::Regex::new(pattern) {
            return Err(validation_err(format!(
                "features.denylist_extra entry {pattern:?} is not a valid pattern: {err}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::*;

    fn make_valid_config() -> AppConfig {
        AppConfig {
            server: ServerConfig::default(),
            backend: BackendConfig {
                base_url: "https://backend.test".to_string(),
                api_key: Some("sk-backend".to_string()),
                chat_path: "/v1/chat/completions".to_string(),
                proxy: None,
            },
            models: ModelsConfig {
                default_model: "grok-3".to_string(),
                aliases: [("claude-sonnet-4".to_string(), "grok-3".to_string())]
                    .into_iter()
                    .collect(),
            },
            client_authentication: ClientAuthConfig {
                allowed_keys: vec!["sk-client-key".to_string()],
            },
            features: FeaturesConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate_config(&make_valid_config()).is_ok());
    }

    #[test]
    fn test_empty_allowed_keys_disables_auth() {
        let mut config = make_valid_config();
        config.client_authentication.allowed_keys = vec![];
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_blank_or_duplicate_key() {
        let mut config = make_valid_config();
        config.client_authentication.allowed_keys = vec![" ".to_string()];
        assert!(validate_config(&config).is_err());
        config.client_authentication.allowed_keys = vec!["a".to_string(), "a".to_string()];
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_invalid_base_url() {
        let mut config = make_valid_config();
        config.backend.base_url = "ftp://bad.url".to_string();
        assert!(validate_config(&config).is_err());
        config.backend.base_url = "not a url".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_chat_path_needs_leading_slash() {
        let mut config = make_valid_config();
        config.backend.chat_path = "v1/chat/completions".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_invalid_proxy_url() {
        let mut config = make_valid_config();
        config.backend.proxy = Some("bad-proxy".to_string());
        assert!(validate_config(&config).is_err());
        config.backend.proxy = Some("http://127.0.0.1:8080".to_string());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_empty_alias_target() {
        let mut config = make_valid_config();
        config.models.aliases.insert("x".to_string(), " ".to_string());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_empty_default_model() {
        let mut config = make_valid_config();
        config.models.default_model = String::new();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = make_valid_config();
        config.features.log_level = "VERBOSE".to_string();
        assert!(validate_config(&config).is_err());
        config.features.log_level = "warning".to_string();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_buffer_cap_floor() {
        let mut config = make_valid_config();
        config.features.max_buffered_bytes = 10;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_bad_denylist_pattern() {
        let mut config = make_valid_config();
        config.features.denylist_extra = vec!["(unclosed".to_string()];
        let msg = validate_config(&config).unwrap_err().to_string();
        assert!(msg.contains("denylist_extra"));
    }

    #[test]
    fn test_invalid_runtime_worker_threads() {
        let mut config = make_valid_config();
        config.server.runtime_worker_threads = Some(0);
        assert!(validate_config(&config).is_err());
    }
}
