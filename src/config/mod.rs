pub mod validation;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use self::validation::validate_config;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Listener and runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    /// Upstream request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_http_pool_max_idle_per_host")]
    pub http_pool_max_idle_per_host: usize,
    #[serde(default = "default_http_pool_idle_timeout_secs")]
    pub http_pool_idle_timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_worker_threads: Option<usize>,
    #[serde(default)]
    pub base_path: String,
    #[serde(default = "default_body_limit_bytes")]
    pub body_limit_bytes: usize,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_timeout() -> u64 {
    180
}
fn default_http_pool_max_idle_per_host() -> usize {
    16
}
fn default_http_pool_idle_timeout_secs() -> u64 {
    15
}
fn default_body_limit_bytes() -> usize {
    2 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            timeout: default_timeout(),
            http_pool_max_idle_per_host: default_http_pool_max_idle_per_host(),
            http_pool_idle_timeout_secs: default_http_pool_idle_timeout_secs(),
            runtime_worker_threads: None,
            base_path: String::new(),
            body_limit_bytes: default_body_limit_bytes(),
        }
    }
}

/// The free-text chat backend behind the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_chat_path")]
    pub chat_path: String,
    #[serde(default)]
    pub proxy: Option<String>,
}

fn default_chat_path() -> String {
    "/v1/chat/completions".to_string()
}

/// Client model names and the backend models they run on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Backend model used for names that are neither aliases nor backend
    /// models.
    pub default_model: String,
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
}

/// Client authentication configuration. An empty list disables checks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientAuthConfig {
    #[serde(default)]
    pub allowed_keys: Vec<String>,
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Cap on backend text buffered for one tool-mode turn.
    #[serde(default = "default_max_buffered_bytes")]
    pub max_buffered_bytes: usize,
    #[serde(default = "default_true")]
    pub sanitize_system_prompt: bool,
    #[serde(default = "default_true")]
    pub scrub_responses: bool,
    #[serde(default)]
    pub persona: Option<String>,
    /// Extra identity patterns, matched case-insensitively within a sentence.
    #[serde(default)]
    pub denylist_extra: Vec<String>,
}

fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "INFO".to_string()
}
fn default_max_buffered_bytes() -> usize {
    512 * 1024
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            max_buffered_bytes: default_max_buffered_bytes(),
            sanitize_system_prompt: true,
            scrub_responses: true,
            persona: None,
            denylist_extra: Vec::new(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub backend: BackendConfig,
    pub models: ModelsConfig,
    #[serde(default)]
    pub client_authentication: ClientAuthConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Parse and validate configuration from YAML text.
///
/// # Errors
///
/// Same as [`load_config`], minus I/O.
pub fn parse_config(contents: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = serde_yaml::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_example_config() {
        let config = load_config("config.example.yaml");
        assert!(
            config.is_ok(),
            "Failed to load example config: {:?}",
            config.err()
        );
        let config = config.unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.server.http_pool_max_idle_per_host, 16);
        assert_eq!(config.backend.chat_path, "/v1/chat/completions");
        assert!(!config.models.aliases.is_empty());
        assert_eq!(config.client_authentication.allowed_keys.len(), 2);
        assert_eq!(config.features.max_buffered_bytes, 512 * 1024);
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let yaml = "backend:\n  base_url: http://127.0.0.1:9000\nmodels:\n  default_model: grok-3\n";
        let config = parse_config(yaml).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.body_limit_bytes, 2 * 1024 * 1024);
        assert!(config.backend.api_key.is_none());
        assert!(config.client_authentication.allowed_keys.is_empty());
        assert!(config.features.sanitize_system_prompt);
        assert!(config.features.scrub_responses);
    }

    #[test]
    fn test_missing_backend_is_yaml_error() {
        let err = parse_config("models:\n  default_model: x\n").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }
}
