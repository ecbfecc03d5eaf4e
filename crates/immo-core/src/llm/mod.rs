//! The generation provider seam.
//!
//! [`GenerationClient`] is what the coordinator talks to. [`AnthropicClient`]
//! is the production implementation; [`RetryingClient`] wraps any client
//! with bounded exponential backoff on transient failures.

pub mod anthropic;
pub mod config;
pub mod json;
pub mod retry;
pub mod sse;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;

use crate::error::Result;

pub use anthropic::AnthropicClient;
pub use config::ProviderConfig;
pub use json::{extract_json, normalize_list};
pub use retry::{RetryConfig, RetryingClient};

/// Lazily produced text chunks. Finite, and not restartable.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// One prompt to the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub system_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: system_prompt.into(),
            temperature: 0.7,
            max_tokens: 4000,
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Text and JSON generation against an LLM provider.
///
/// Implementations classify failures into
/// [`Authentication`](crate::GenerationError::Authentication),
/// [`TransientProvider`](crate::GenerationError::TransientProvider) and
/// everything else, so callers can decide what to retry.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Model identifier reported alongside generated records.
    fn model(&self) -> &str;

    /// Generate a complete text response.
    async fn generate_text(&self, request: &GenerationRequest) -> Result<String>;

    /// Generate a response and parse it as JSON.
    ///
    /// The default asks for text and pulls the JSON document out of it,
    /// tolerating Markdown fences and surrounding chatter.
    async fn generate_json(&self, request: &GenerationRequest) -> Result<Value> {
        let text = self.generate_text(request).await?;
        extract_json(&text)
    }

    /// Stream the response as it is generated.
    fn stream_text(&self, request: &GenerationRequest) -> TextStream;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    struct EchoClient;

    #[async_trait]
    impl GenerationClient for EchoClient {
        fn model(&self) -> &str {
            "echo"
        }

        async fn generate_text(&self, request: &GenerationRequest) -> Result<String> {
            Ok(request.prompt.clone())
        }

        fn stream_text(&self, request: &GenerationRequest) -> TextStream {
            let words: Vec<Result<String>> = request
                .prompt
                .split_inclusive(' ')
                .map(|w| Ok(w.to_owned()))
                .collect();
            Box::pin(futures::stream::iter(words))
        }
    }

    #[tokio::test]
    async fn default_generate_json_parses_text() {
        let client: Box<dyn GenerationClient> = Box::new(EchoClient);
        let request = GenerationRequest::new("```json\n{\"title\": \"T\"}\n```", "sys");
        let value = client.generate_json(&request).await.unwrap();
        assert_eq!(value["title"], "T");
    }

    #[tokio::test]
    async fn default_generate_json_rejects_prose() {
        let request = GenerationRequest::new("no json here", "sys");
        let err = EchoClient.generate_json(&request).await.unwrap_err();
        assert!(matches!(err, crate::GenerationError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn stream_concatenates_to_full_text() {
        let request = GenerationRequest::new("one two three", "sys");
        let chunks: Vec<String> = EchoClient
            .stream_text(&request)
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.concat(), "one two three");
    }

    #[test]
    fn request_builder_overrides_defaults() {
        let request = GenerationRequest::new("p", "s").temperature(0.8).max_tokens(10);
        assert_eq!(request.temperature, 0.8);
        assert_eq!(request.max_tokens, 10);
    }
}
