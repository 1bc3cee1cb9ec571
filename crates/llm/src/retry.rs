use async_trait::async_trait;
use ticketline_common::{Result, RetryConfig};

use crate::client::{LlmClient, LlmRequest, LlmResponse};

/// Retries completions that failed with an upstream-unavailable error.
pub struct RetryingClient<T: LlmClient> {
    inner: T,
    config: RetryConfig,
}

impl<T: LlmClient> RetryingClient<T> {
    pub fn new(inner: T, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl<T: LlmClient> LlmClient for RetryingClient<T> {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        self.config
            .run("llm completion", || self.inner.complete(request.clone()))
            .await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use ticketline_common::TicketlineError;

    struct FlakyClient {
        calls: AtomicU32,
        failures: u32,
        error: fn() -> TicketlineError,
    }

    #[async_trait]
    impl LlmClient for FlakyClient {
        async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err((self.error)());
            }
            Ok(LlmResponse {
                content: "ok".to_string(),
                model: "flaky".to_string(),
                usage: None,
                finish_reason: None,
            })
        }
        fn model_name(&self) -> &str {
            "flaky"
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 1,
            initial_delay_ms: 1,
            max_delay_ms: 2,
            backoff_multiplier: 1.0,
        }
    }

    #[tokio::test]
    async fn recovers_after_one_transient_failure() {
        let client = RetryingClient::new(
            FlakyClient {
                calls: AtomicU32::new(0),
                failures: 1,
                error: || TicketlineError::UpstreamUnavailable("503".into()),
            },
            fast_retry(),
        );

        let response = client.complete(LlmRequest::default()).await.unwrap();
        assert_eq!(response.content, "ok");
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let client = RetryingClient::new(
            FlakyClient {
                calls: AtomicU32::new(0),
                failures: 5,
                error: || TicketlineError::UpstreamUnavailable("timeout".into()),
            },
            fast_retry(),
        );

        assert!(client.complete(LlmRequest::default()).await.is_err());
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn does_not_retry_invalid_requests() {
        let client = RetryingClient::new(
            FlakyClient {
                calls: AtomicU32::new(0),
                failures: 5,
                error: || TicketlineError::InvalidRequest("401 Unauthorized".into()),
            },
            fast_retry(),
        );

        assert!(client.complete(LlmRequest::default()).await.is_err());
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 1);
    }
}
