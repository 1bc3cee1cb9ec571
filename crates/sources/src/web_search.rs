//! Web search through the Tavily search API.
//!
//! A search returns a short synthesized answer (when the provider offers
//! one) plus the result links backing it.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use ticketline_common::{Result, RetryConfig, TicketlineError};
use tracing::{debug, info};

use crate::config::WebSearchConfig;

const SERVICE: &str = "tavily";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSearchResponse {
    pub query: String,
    pub answer: Option<String>,
    pub hits: Vec<WebHit>,
}

#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<WebSearchResponse>;
}

#[derive(Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: usize,
    search_depth: &'a str,
    include_answer: bool,
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

pub struct TavilyClient {
    api_url: String,
    api_key: String,
    max_results: usize,
    search_depth: String,
    retry: RetryConfig,
    http_client: reqwest::Client,
}

impl TavilyClient {
    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        max_results: usize,
        search_depth: impl Into<String>,
        timeout: Duration,
        retry: RetryConfig,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TicketlineError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            max_results,
            search_depth: search_depth.into(),
            retry,
            http_client,
        })
    }

    /// `None` when no API key is configured.
    pub fn from_config(config: &WebSearchConfig, retry: RetryConfig) -> Result<Option<Self>> {
        let Some(api_key) = config.resolve_api_key() else {
            return Ok(None);
        };
        let client = Self::new(
            config.api_url.clone(),
            api_key,
            config.max_results,
            config.search_depth.clone(),
            Duration::from_millis(config.timeout_ms),
            retry,
        )?;
        info!(max_results = config.max_results, "Initialized web search");
        Ok(Some(client))
    }

    async fn perform_search(&self, query: &str) -> Result<TavilyResponse> {
        let url = format!("{}/search", self.api_url);
        let response = self
            .http_client
            .post(&url)
            .json(&TavilyRequest {
                api_key: &self.api_key,
                query,
                max_results: self.max_results,
                search_depth: &self.search_depth,
                include_answer: true,
            })
            .send()
            .await
            .map_err(|e| TicketlineError::transport(SERVICE, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TicketlineError::from_status(SERVICE, status.as_u16(), &body));
        }

        response.json().await.map_err(|e| {
            TicketlineError::UpstreamUnavailable(format!("Failed to parse {SERVICE} response: {e}"))
        })
    }
}

#[async_trait]
impl WebSearch for TavilyClient {
    async fn search(&self, query: &str) -> Result<WebSearchResponse> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Err(TicketlineError::InvalidRequest(
                "Web search query cannot be empty".into(),
            ));
        }

        let parsed = self
            .retry
            .run("web search", || self.perform_search(trimmed))
            .await?;

        debug!(query = trimmed, hits = parsed.results.len(), "Web search complete");

        Ok(WebSearchResponse {
            query: trimmed.to_string(),
            answer: parsed.answer.filter(|a| !a.trim().is_empty()),
            hits: parsed
                .results
                .into_iter()
                .map(|r| WebHit {
                    title: r.title,
                    url: r.url,
                    snippet: r.content,
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::{json, Value};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client(base: &str) -> TavilyClient {
        TavilyClient::new(
            base,
            "tvly-test",
            3,
            "basic",
            Duration::from_secs(5),
            RetryConfig::none(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn answer_and_hits_are_extracted() {
        let base = serve(Router::new().route(
            "/search",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["api_key"], "tvly-test");
                assert_eq!(body["max_results"], 3);
                Json(json!({
                    "answer": "Redmine 5.1 is the latest stable release.",
                    "results": [
                        {"title": "Redmine news", "url": "https://www.redmine.org/news", "content": "Redmine 5.1.0 released", "score": 0.9}
                    ]
                }))
            }),
        ))
        .await;

        let response = client(&base).search("latest redmine version").await.unwrap();
        assert_eq!(
            response.answer.as_deref(),
            Some("Redmine 5.1 is the latest stable release.")
        );
        assert_eq!(response.hits.len(), 1);
        assert_eq!(response.hits[0].url, "https://www.redmine.org/news");
    }

    #[tokio::test]
    async fn blank_query_is_rejected() {
        let err = client("http://127.0.0.1:9").search("   ").await.unwrap_err();
        assert!(matches!(err, TicketlineError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn unauthorized_is_invalid_request() {
        let base = serve(Router::new().route(
            "/search",
            post(|| async { (StatusCode::UNAUTHORIZED, "invalid api key") }),
        ))
        .await;

        let err = client(&base).search("anything").await.unwrap_err();
        assert!(matches!(err, TicketlineError::InvalidRequest(_)));
    }
}
