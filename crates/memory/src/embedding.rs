//! Text embedding backends for the issue index.
//!
//! [`HttpEmbedder`] talks to any OpenAI-compatible `/v1/embeddings` endpoint.
//! With the `local-embeddings` feature, [`FastEmbedder`] runs
//! all-MiniLM-L6-v2 in process through fastembed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use ticketline_common::{Result, RetryConfig, TicketlineError};
use tracing::{debug, info};

use crate::types::IndexConfig;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, preserving order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn model_name(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| TicketlineError::Index("Empty embedding result".into()))
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

pub struct HttpEmbedder {
    base_url: String,
    model: String,
    api_key: Option<String>,
    retry: RetryConfig,
    http_client: reqwest::Client,
}

impl HttpEmbedder {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
        retry: RetryConfig,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TicketlineError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
            retry,
            http_client,
        })
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let mut req = self.http_client.post(&url).json(&EmbeddingRequest {
            model: &self.model,
            input: texts,
        });
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| TicketlineError::transport("embeddings", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TicketlineError::from_status(
                "embeddings",
                status.as_u16(),
                &body,
            ));
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| TicketlineError::Index(format!("Failed to parse embeddings: {e}")))?;

        if parsed.data.len() != texts.len() {
            return Err(TicketlineError::Index(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let embeddings = self.retry.run("embedding", || self.request(texts)).await?;
        debug!(
            batch_size = embeddings.len(),
            dimension = embeddings.first().map(|e| e.len()).unwrap_or(0),
            "Generated embeddings"
        );
        Ok(embeddings)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(feature = "local-embeddings")]
pub use local::FastEmbedder;

#[cfg(feature = "local-embeddings")]
mod local {
    use std::sync::Arc;

    use async_trait::async_trait;
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use once_cell::sync::OnceCell;
    use ticketline_common::{Result, TicketlineError};
    use tracing::info;

    use super::Embedder;

    /// In-process sentence-transformer embeddings, loaded on first use.
    pub struct FastEmbedder {
        model_id: String,
        model_name: EmbeddingModel,
        model: OnceCell<Arc<TextEmbedding>>,
    }

    impl FastEmbedder {
        pub fn from_model_str(name: &str) -> Result<Self> {
            let model_name = match name {
                "all-MiniLM-L6-v2" | "AllMiniLML6V2" => EmbeddingModel::AllMiniLML6V2,
                "all-MiniLM-L12-v2" | "AllMiniLML12V2" => EmbeddingModel::AllMiniLML12V2,
                "bge-small-en-v1.5" | "BGESmallENV15" => EmbeddingModel::BGESmallENV15,
                "bge-base-en-v1.5" | "BGEBaseENV15" => EmbeddingModel::BGEBaseENV15,
                _ => {
                    return Err(TicketlineError::Config(format!(
                        "Unknown local embedding model: '{name}'"
                    )));
                }
            };
            Ok(Self {
                model_id: name.to_string(),
                model_name,
                model: OnceCell::new(),
            })
        }

        fn get_or_init_model(&self) -> Result<Arc<TextEmbedding>> {
            self.model
                .get_or_try_init(|| {
                    info!(model = ?self.model_name, "Initializing embedding model");
                    let options = InitOptions::new(self.model_name.clone());
                    let model = TextEmbedding::try_new(options)
                        .map_err(|e| TicketlineError::Index(e.to_string()))?;
                    Ok(Arc::new(model))
                })
                .cloned()
        }
    }

    #[async_trait]
    impl Embedder for FastEmbedder {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if texts.is_empty() {
                return Ok(Vec::new());
            }
            let model = self.get_or_init_model()?;
            let texts = texts.to_vec();

            // fastembed is synchronous
            tokio::task::spawn_blocking(move || {
                model
                    .embed(texts, None)
                    .map_err(|e| TicketlineError::Index(e.to_string()))
            })
            .await
            .map_err(|e| TicketlineError::Index(format!("Embedding task failed: {e}")))?
        }

        fn model_name(&self) -> &str {
            &self.model_id
        }
    }
}

/// Build the embedder selected by `config.embedding_provider`.
pub fn build_embedder(config: &IndexConfig, retry: RetryConfig) -> Result<Arc<dyn Embedder>> {
    let embedder: Arc<dyn Embedder> = match config.embedding_provider.as_str() {
        "http" => Arc::new(HttpEmbedder::new(
            config.embedding_api_url.clone(),
            config.embedding_model.clone(),
            config.resolve_api_key(),
            Duration::from_millis(config.timeout_ms),
            retry,
        )?),
        #[cfg(feature = "local-embeddings")]
        "local" => Arc::new(FastEmbedder::from_model_str(&config.embedding_model)?),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => {
            return Err(TicketlineError::Config(
                "Local embeddings require the `local-embeddings` feature".into(),
            ));
        }
        other => {
            return Err(TicketlineError::Config(format!(
                "Unknown embedding provider: {other}. Available: http, local"
            )));
        }
    };

    info!(
        provider = %config.embedding_provider,
        model = %config.embedding_model,
        "Initialized embedder"
    );
    Ok(embedder)
}
