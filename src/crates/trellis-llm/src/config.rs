//! Provider configuration.

use std::time::Duration;
use trellis_core::error::{EngineError, ErrorCode, ProviderFailure, Result};

fn default_timeout() -> Duration {
    Duration::from_secs(120)
}

/// Configuration for an OpenRouter-style remote provider.
#[derive(Debug, Clone)]
pub struct RemoteLlmConfig {
    /// API key for authentication.
    pub api_key: String,
    /// Base URL, e.g. `https://openrouter.ai/api/v1`.
    pub base_url: String,
    /// Request timeout.
    pub timeout: Duration,
    /// Application name sent for request attribution.
    pub app_name: Option<String>,
}

impl RemoteLlmConfig {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            timeout: default_timeout(),
            app_name: None,
        }
    }

    /// Read the API key from an environment variable.
    pub fn from_env(env_var: &str, base_url: impl Into<String>) -> Result<Self> {
        let api_key = std::env::var(env_var).map_err(|_| {
            EngineError::Provider(ProviderFailure::from_message(
                ErrorCode::Auth,
                format!("API key not found in environment variable {}", env_var),
            ))
        })?;
        Ok(Self::new(api_key, base_url))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_fields() {
        let config = RemoteLlmConfig::new("key", "https://openrouter.ai/api/v1")
            .with_timeout(Duration::from_secs(30))
            .with_app_name("trellis");
        assert_eq!(config.api_key, "key");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.app_name.as_deref(), Some("trellis"));
    }

    #[test]
    fn missing_env_var_is_an_auth_error() {
        let result = RemoteLlmConfig::from_env("TRELLIS_NO_SUCH_VAR", "https://example.test");
        match result {
            Err(e) => assert_eq!(e.code(), ErrorCode::Auth),
            Ok(_) => panic!("expected an error"),
        }
    }
}
