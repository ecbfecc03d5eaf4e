use std::env;
use std::fmt;
use std::time::Duration;

/// Connection settings for the Anthropic Messages API.
///
/// Built once at startup and handed to [`AnthropicClient::new`]; nothing
/// downstream reads the environment.
///
/// [`AnthropicClient::new`]: super::AnthropicClient::new
#[derive(Clone)]
pub struct ProviderConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub api_version: String,
    /// Per-request timeout, covering the whole response body.
    pub timeout: Duration,
    pub max_tokens: u32,
}

impl ProviderConfig {
    pub const DEFAULT_MODEL: &str = "claude-3-sonnet-20240229";
    pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
    pub const API_VERSION: &str = "2023-06-01";
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
    pub const DEFAULT_MAX_TOKENS: u32 = 4000;

    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: Self::DEFAULT_MODEL.to_owned(),
            base_url: Self::DEFAULT_BASE_URL.to_owned(),
            api_version: Self::API_VERSION.to_owned(),
            timeout: Self::DEFAULT_TIMEOUT,
            max_tokens: Self::DEFAULT_MAX_TOKENS,
        }
    }

    /// `ANTHROPIC_API_KEY`, `IMMO_MODEL` and `IMMO_ANTHROPIC_BASE_URL`.
    ///
    /// A missing key yields an empty one; the provider will answer with an
    /// authentication error, which is surfaced rather than retried.
    pub fn from_env() -> Self {
        let mut config = Self::new(env::var("ANTHROPIC_API_KEY").unwrap_or_default());
        if let Ok(model) = env::var("IMMO_MODEL") {
            config.model = model;
        }
        if let Ok(url) = env::var("IMMO_ANTHROPIC_BASE_URL") {
            config.base_url = url;
        }
        config
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_version", &self.api_version)
            .field("timeout", &self.timeout)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ProviderConfig::new("sk-test");
        assert_eq!(cfg.model, "claude-3-sonnet-20240229");
        assert_eq!(cfg.timeout, Duration::from_secs(120));
        assert_eq!(cfg.max_tokens, 4000);
        assert_eq!(cfg.messages_url(), "https://api.anthropic.com/v1/messages");
    }

    #[test]
    fn base_url_trailing_slash() {
        let cfg = ProviderConfig::new("k").with_base_url("http://localhost:8080/");
        assert_eq!(cfg.messages_url(), "http://localhost:8080/v1/messages");
    }

    #[test]
    fn debug_never_prints_key() {
        let cfg = ProviderConfig::new("sk-very-secret");
        let debug = format!("{cfg:?}");
        assert!(!debug.contains("sk-very-secret"));
        assert!(debug.contains("<redacted>"));
    }
}
