//! Bounded exponential backoff around any [`GenerationClient`].

use std::time::Duration;

use async_trait::async_trait;
use tokio_retry2::strategy::{ExponentialBackoff, jitter};
use tokio_retry2::{Retry, RetryError};
use tracing::warn;

use super::{GenerationClient, GenerationRequest, TextStream};
use crate::error::Result;

/// How hard to try before giving up on a transient failure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after each retry.
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(4),
            max_backoff: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            jitter: false,
        }
    }

    /// Delays between consecutive attempts.
    pub fn delays(&self) -> Vec<Duration> {
        let retries = self.max_attempts.saturating_sub(1) as usize;
        // base^n * factor with base 2 gives initial, 2*initial, 4*initial...
        let factor = u64::try_from(self.initial_backoff.as_millis() / 2).unwrap_or(u64::MAX);
        let backoff = ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(self.max_backoff);
        if self.jitter {
            backoff.map(jitter).take(retries).collect()
        } else {
            backoff.take(retries).collect()
        }
    }
}

/// Retries `generate_text` (and therefore the default `generate_json`) on
/// transient provider errors. Streams pass through unretried.
pub struct RetryingClient<C> {
    inner: C,
    config: RetryConfig,
}

impl<C: GenerationClient> RetryingClient<C> {
    pub fn new(inner: C, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<C: GenerationClient> GenerationClient for RetryingClient<C> {
    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn generate_text(&self, request: &GenerationRequest) -> Result<String> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0u32;

        Retry::spawn(self.config.delays(), || {
            attempt += 1;
            let n = attempt;
            async move {
                match self.inner.generate_text(request).await {
                    Ok(text) => Ok(text),
                    Err(e) if e.is_retryable() => {
                        warn!(attempt = n, max_attempts, error = %e, "transient provider error");
                        Err(RetryError::Transient {
                            err: e,
                            retry_after: None,
                        })
                    }
                    Err(e) => Err(RetryError::Permanent(e)),
                }
            }
        })
        .await
    }

    fn stream_text(&self, request: &GenerationRequest) -> TextStream {
        self.inner.stream_text(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::error::GenerationError;

    struct Flaky {
        outcomes: Mutex<VecDeque<Result<String>>>,
        calls: AtomicU32,
    }

    impl Flaky {
        fn new(outcomes: Vec<Result<String>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl GenerationClient for Flaky {
        fn model(&self) -> &str {
            "flaky"
        }

        async fn generate_text(&self, _request: &GenerationRequest) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(GenerationError::Provider("script exhausted".into())))
        }

        fn stream_text(&self, _request: &GenerationRequest) -> TextStream {
            Box::pin(futures::stream::empty())
        }
    }

    fn transient() -> Result<String> {
        Err(GenerationError::TransientProvider("HTTP 429".into()))
    }

    #[test]
    fn default_delays_double_and_cap() {
        let config = RetryConfig {
            jitter: false,
            ..RetryConfig::default()
        };
        assert_eq!(
            config.delays(),
            vec![Duration::from_secs(4), Duration::from_secs(8)]
        );

        let capped = RetryConfig {
            max_attempts: 6,
            jitter: false,
            ..RetryConfig::default()
        };
        assert_eq!(capped.delays().last(), Some(&Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let client = RetryingClient::new(
            Flaky::new(vec![transient(), transient(), Ok("done".into())]),
            RetryConfig::immediate(3),
        );
        let text = client
            .generate_text(&GenerationRequest::new("p", "s"))
            .await
            .unwrap();
        assert_eq!(text, "done");
        assert_eq!(client.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let client = RetryingClient::new(
            Flaky::new(vec![transient(), transient(), transient(), Ok("late".into())]),
            RetryConfig::immediate(3),
        );
        let err = client
            .generate_text(&GenerationRequest::new("p", "s"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(client.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn authentication_is_not_retried() {
        let client = RetryingClient::new(
            Flaky::new(vec![
                Err(GenerationError::Authentication("bad key".into())),
                Ok("never".into()),
            ]),
            RetryConfig::immediate(3),
        );
        let err = client
            .generate_text(&GenerationRequest::new("p", "s"))
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Authentication(_)));
        assert_eq!(client.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_json_is_not_retried() {
        let client = RetryingClient::new(
            Flaky::new(vec![Ok("not json".into()), Ok("{}".into())]),
            RetryConfig::immediate(3),
        );
        let err = client
            .generate_json(&GenerationRequest::new("p", "s"))
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::MalformedResponse(_)));
        assert_eq!(client.inner().calls.load(Ordering::SeqCst), 1);
    }
}
