use std::sync::Arc;

use crate::auth::{authenticate, build_allowed_key_set, AllowedClientKeys};
use crate::config::AppConfig;
use crate::error::CanonicalError;
use crate::routing::ModelResolver;
use crate::sanitize::SystemPromptSanitizer;
use crate::upstream::{HttpUpstream, UpstreamClient};

/// Shared application state accessible to all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub upstream: Arc<dyn UpstreamClient>,
    pub sanitizer: Arc<SystemPromptSanitizer>,
    pub models: ModelResolver,
    allowed_client_keys: AllowedClientKeys,
}

impl AppState {
    /// Build state around an already constructed upstream client.
    ///
    /// # Errors
    ///
    /// Returns `CanonicalError::Config` when the sanitizer settings are invalid.
    pub fn new(config: AppConfig, upstream: Arc<dyn UpstreamClient>) -> Result<Self, CanonicalError> {
        let sanitizer = Arc::new(SystemPromptSanitizer::from_features(&config.features)?);
        let models = ModelResolver::new(&config.models);
        let allowed_client_keys = build_allowed_key_set(&config);
        Ok(Self {
            config,
            upstream,
            sanitizer,
            models,
            allowed_client_keys,
        })
    }

    /// Build state with the HTTP backend client described by `config`.
    ///
    /// # Errors
    ///
    /// Returns `CanonicalError::Config` when the backend client cannot be built.
    pub fn from_config(config: AppConfig) -> Result<Self, CanonicalError> {
        let upstream = HttpUpstream::new(&config.backend, &config.server)?;
        Self::new(config, Arc::new(upstream))
    }

    /// # Errors
    ///
    /// Returns `CanonicalError::Auth` when the API key is missing or invalid.
    pub fn authenticate(&self, headers: &http::HeaderMap) -> Result<(), CanonicalError> {
        authenticate(headers, &self.allowed_client_keys)
    }

    #[must_use]
    pub fn max_buffered_bytes(&self) -> usize {
        self.config.features.max_buffered_bytes
    }
}
