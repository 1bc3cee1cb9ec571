use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use ticketline_common::{Result, RetryConfig, TicketlineError};
use tracing::info;

use crate::client::{LlmClient, LlmRequest, LlmResponse};
use crate::openai::{OpenAiCompatibleClient, GROQ_BASE_URL, OPENAI_BASE_URL};
use crate::retry::RetryingClient;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "groq" or "openai"
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Falls back to GROQ_API_KEY / OPENAI_API_KEY.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_provider() -> String {
    "groq".into()
}

fn default_model() -> String {
    "llama-3.3-70b-versatile".into()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_timeout_ms() -> u64 {
    60_000
}

fn default_max_concurrent() -> usize {
    4
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: None,
            api_url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_ms: default_timeout_ms(),
            max_concurrent_requests: default_max_concurrent(),
            retry: RetryConfig::default(),
        }
    }
}

impl LlmConfig {
    /// Explicit key first, then the provider's environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(ref key) = self.api_key {
            if !key.is_empty() {
                return Some(key.clone());
            }
        }

        let env_var = provider_key_var(&self.provider)?;
        std::env::var(env_var).ok().filter(|k| !k.is_empty())
    }
}

fn provider_key_var(provider: &str) -> Option<&'static str> {
    match provider {
        "groq" => Some("GROQ_API_KEY"),
        "openai" => Some("OPENAI_API_KEY"),
        _ => None,
    }
}

/// Caps in-flight completions at `max_concurrent_requests`.
pub struct BoundedClient<T: LlmClient> {
    inner: T,
    permits: tokio::sync::Semaphore,
}

impl<T: LlmClient> BoundedClient<T> {
    pub fn new(inner: T, max_concurrent: usize) -> Self {
        Self {
            inner,
            permits: tokio::sync::Semaphore::new(max_concurrent.max(1)),
        }
    }
}

#[async_trait]
impl<T: LlmClient> LlmClient for BoundedClient<T> {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| TicketlineError::Llm("LLM client is shutting down".into()))?;
        self.inner.complete(request).await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

/// Build the configured provider wrapped in retry and concurrency limits.
pub fn build_llm_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    let default_url = match config.provider.as_str() {
        "groq" => GROQ_BASE_URL,
        "openai" => OPENAI_BASE_URL,
        other => {
            return Err(TicketlineError::Config(format!(
                "Unknown LLM provider: {other}. Available: groq, openai"
            )));
        }
    };

    let api_key = config.resolve_api_key().ok_or_else(|| {
        TicketlineError::Config(format!(
            "LLM provider '{}' has no API key; set [llm].api_key or {}",
            config.provider,
            provider_key_var(&config.provider).unwrap_or("an API key variable")
        ))
    })?;

    let provider = OpenAiCompatibleClient::new(
        config.provider.clone(),
        config.api_url.clone().unwrap_or_else(|| default_url.to_string()),
        config.model.clone(),
        Some(api_key),
        Duration::from_millis(config.timeout_ms),
    )?
    .with_defaults(config.temperature, config.max_tokens);

    info!(
        provider = %config.provider,
        model = %config.model,
        max_concurrent = config.max_concurrent_requests,
        "Initialized LLM client"
    );

    Ok(Arc::new(BoundedClient::new(
        RetryingClient::new(provider, config.retry.clone()),
        config.max_concurrent_requests,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOML_CONFIG: &str = r#"
provider = "openai"
model = "gpt-4o-mini"
api_key = "sk-test"
api_url = "http://localhost:8089"
max_concurrent_requests = 8

[retry]
max_retries = 2
initial_delay_ms = 1000
"#;

    #[test]
    fn deserialize_config_from_toml() {
        let config: LlmConfig = toml::from_str(TOML_CONFIG).unwrap();
        assert_eq!(config.provider, "openai");
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.api_url.as_deref(), Some("http://localhost:8089"));
        assert_eq!(config.max_concurrent_requests, 8);
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.retry.max_delay_ms, 30_000);
    }

    #[test]
    fn deserialize_config_defaults() {
        let config: LlmConfig = toml::from_str("").unwrap();
        assert_eq!(config.provider, "groq");
        assert_eq!(config.model, "llama-3.3-70b-versatile");
        assert_eq!(config.max_tokens, 4096);
        assert_eq!(config.retry.max_retries, 1);
    }

    #[test]
    fn build_groq_client() {
        let config = LlmConfig {
            api_key: Some("gsk-test".into()),
            ..Default::default()
        };
        let client = build_llm_client(&config).unwrap();
        assert_eq!(client.model_name(), "llama-3.3-70b-versatile");
    }

    #[test]
    fn build_openai_client() {
        let config = LlmConfig {
            provider: "openai".into(),
            model: "gpt-4".into(),
            api_key: Some("sk-test".into()),
            ..Default::default()
        };
        let client = build_llm_client(&config).unwrap();
        assert_eq!(client.model_name(), "gpt-4");
    }

    #[test]
    fn build_unknown_provider_fails() {
        let config = LlmConfig {
            provider: "gemini".into(),
            api_key: Some("key".into()),
            ..Default::default()
        };
        assert!(matches!(
            build_llm_client(&config),
            Err(TicketlineError::Config(_))
        ));
    }

    #[tokio::test]
    async fn bounded_client_caps_in_flight_requests() {
        use std::sync::atomic::{AtomicU32, Ordering};

        #[derive(Default)]
        struct SlowClient {
            in_flight: AtomicU32,
            peak: AtomicU32,
        }

        #[async_trait]
        impl LlmClient for SlowClient {
            async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse> {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(LlmResponse {
                    content: "answer".into(),
                    model: "slow".into(),
                    usage: None,
                    finish_reason: None,
                })
            }

            fn model_name(&self) -> &str {
                "slow"
            }
        }

        let client = Arc::new(BoundedClient::new(SlowClient::default(), 2));
        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let client = client.clone();
                tokio::spawn(async move { client.complete(LlmRequest::default()).await })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }

        assert_eq!(client.model_name(), "slow");
        assert!(client.inner.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn configured_sampling_reaches_the_wire() {
        use axum::{extract::State, routing::post, Json, Router};
        use std::sync::Mutex;

        type Captured = Arc<Mutex<Option<serde_json::Value>>>;
        let captured: Captured = Arc::default();

        async fn completions(
            State(captured): State<Captured>,
            Json(body): Json<serde_json::Value>,
        ) -> Json<serde_json::Value> {
            *captured.lock().unwrap() = Some(body);
            Json(serde_json::json!({
                "model": "gpt-4o-mini",
                "choices": [{"message": {"role": "assistant", "content": "ok"}}]
            }))
        }

        let router = Router::new()
            .route("/v1/chat/completions", post(completions))
            .with_state(captured.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let config = LlmConfig {
            provider: "openai".into(),
            model: "gpt-4o-mini".into(),
            api_key: Some("sk-test".into()),
            api_url: Some(format!("http://{addr}")),
            temperature: 0.25,
            max_tokens: 1024,
            ..Default::default()
        };
        let client = build_llm_client(&config).unwrap();
        client.complete(LlmRequest::default()).await.unwrap();

        let body = captured.lock().unwrap().take().unwrap();
        assert_eq!(body["temperature"], 0.25);
        assert_eq!(body["max_tokens"], 1024);
    }
}
