//! Issue similarity index.
//!
//! The index is a JSON file of pre-computed issue embeddings produced offline
//! by [`IndexBuilder`]. At runtime it is loaded into memory and searched by
//! brute-force cosine similarity.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use ticketline_common::{Result, TicketlineError};
use tracing::{debug, info, warn};

use crate::embedding::Embedder;
use crate::types::{IndexDocument, IndexStats, IndexedRecord, ScoredRecord, SimilarityOutcome};

/// On-disk index format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexFile {
    pub model: String,
    pub dimension: usize,
    pub built_at: DateTime<Utc>,
    pub records: Vec<IndexedRecord>,
}

impl IndexFile {
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        let file: IndexFile = serde_json::from_str(&raw)?;
        if let Some(bad) = file
            .records
            .iter()
            .find(|r| r.embedding.len() != file.dimension)
        {
            return Err(TicketlineError::Index(format!(
                "Issue #{} has a {}-dim embedding, index declares {}",
                bad.document.issue_id,
                bad.embedding.len(),
                file.dimension
            )));
        }
        Ok(file)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string(self)?;
        tokio::fs::write(path, json).await?;
        info!(
            path = %path.display(),
            records = self.records.len(),
            "Saved issue index"
        );
        Ok(())
    }
}

/// Searchable view over a loaded [`IndexFile`].
pub struct VectorIndex {
    embedder: Option<Arc<dyn Embedder>>,
    file: RwLock<Option<Arc<IndexFile>>>,
}

impl VectorIndex {
    /// An index that answers every search with `Unavailable`.
    pub fn unavailable() -> Self {
        Self {
            embedder: None,
            file: RwLock::new(None),
        }
    }

    /// An index with an embedder but nothing loaded yet; see [`Self::swap`].
    pub fn empty(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder: Some(embedder),
            file: RwLock::new(None),
        }
    }

    pub fn new(embedder: Arc<dyn Embedder>, file: IndexFile) -> Self {
        if file.model != embedder.model_name() {
            warn!(
                index_model = %file.model,
                embedder_model = %embedder.model_name(),
                "Index was built with a different embedding model"
            );
        }
        Self {
            embedder: Some(embedder),
            file: RwLock::new(Some(Arc::new(file))),
        }
    }

    /// Load the index at `path`. A missing file leaves the index unavailable.
    pub async fn load(path: &Path, embedder: Arc<dyn Embedder>) -> Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "Issue index not found; semantic search disabled");
            return Ok(Self::empty(embedder));
        }

        let file = IndexFile::load(path).await?;
        info!(
            path = %path.display(),
            records = file.records.len(),
            dimension = file.dimension,
            "Loaded issue index"
        );
        Ok(Self::new(embedder, file))
    }

    /// Replace the loaded index; in-flight searches keep the previous one.
    pub fn swap(&self, file: IndexFile) {
        *self.file.write() = Some(Arc::new(file));
    }

    fn snapshot(&self) -> Option<Arc<IndexFile>> {
        self.file.read().clone()
    }

    pub fn is_available(&self) -> bool {
        self.embedder.is_some()
            && self
                .snapshot()
                .map(|f| !f.records.is_empty())
                .unwrap_or(false)
    }

    /// Up to `k` records most similar to `query`.
    pub async fn similarity_search(&self, query: &str, k: usize) -> SimilarityOutcome {
        let (Some(embedder), Some(file)) = (self.embedder.as_ref(), self.snapshot()) else {
            return SimilarityOutcome::Unavailable;
        };
        if file.records.is_empty() {
            return SimilarityOutcome::Unavailable;
        }

        let query_vec = match embedder.embed(query).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Query embedding failed; semantic search unavailable");
                return SimilarityOutcome::Unavailable;
            }
        };
        if query_vec.len() != file.dimension {
            warn!(
                expected = file.dimension,
                got = query_vec.len(),
                "Query embedding dimension mismatch"
            );
            return SimilarityOutcome::Unavailable;
        }

        let matches = rank(&file, &query_vec, k, None);
        debug!(query, k, hits = matches.len(), "Similarity search");
        SimilarityOutcome::Matches(matches)
    }

    /// Up to `k` records most similar to an indexed issue, excluding itself.
    ///
    /// An issue missing from the index yields no matches.
    pub fn similar_to_issue(&self, issue_id: u64, k: usize) -> SimilarityOutcome {
        let Some(file) = self.snapshot().filter(|f| !f.records.is_empty()) else {
            return SimilarityOutcome::Unavailable;
        };

        let Some(source) = file
            .records
            .iter()
            .find(|r| r.document.issue_id == issue_id)
        else {
            return SimilarityOutcome::Matches(Vec::new());
        };

        SimilarityOutcome::Matches(rank(&file, &source.embedding, k, Some(issue_id)))
    }

    pub fn stats(&self) -> IndexStats {
        match self.snapshot() {
            Some(file) => IndexStats {
                available: self.is_available(),
                record_count: file.records.len(),
                dimension: file.dimension,
                model: Some(file.model.clone()),
                built_at: Some(file.built_at),
            },
            None => IndexStats {
                available: false,
                record_count: 0,
                dimension: 0,
                model: None,
                built_at: None,
            },
        }
    }
}

fn rank(file: &IndexFile, query: &[f32], k: usize, exclude: Option<u64>) -> Vec<ScoredRecord> {
    let mut scored: Vec<ScoredRecord> = file
        .records
        .iter()
        .filter(|r| Some(r.document.issue_id) != exclude)
        .map(|r| ScoredRecord {
            document: r.document.clone(),
            score: cosine_similarity(query, &r.embedding),
        })
        .collect();

    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(k);
    scored
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Embeds issue documents into an [`IndexFile`].
pub struct IndexBuilder {
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
}

impl IndexBuilder {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            batch_size: 32,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub async fn build(&self, documents: Vec<IndexDocument>) -> Result<IndexFile> {
        info!(
            documents = documents.len(),
            model = %self.embedder.model_name(),
            "Building issue index"
        );

        let mut records = Vec::with_capacity(documents.len());
        for chunk in documents.chunks(self.batch_size) {
            let texts: Vec<String> = chunk.iter().map(|d| d.content.clone()).collect();
            let embeddings = self.embedder.embed_batch(&texts).await?;
            if embeddings.len() != chunk.len() {
                return Err(TicketlineError::Index(format!(
                    "Embedder returned {} vectors for {} documents",
                    embeddings.len(),
                    chunk.len()
                )));
            }
            records.extend(
                chunk
                    .iter()
                    .cloned()
                    .zip(embeddings)
                    .map(|(document, embedding)| IndexedRecord {
                        document,
                        embedding,
                    }),
            );
            debug!(indexed = records.len(), "Embedded batch");
        }

        let dimension = records.first().map(|r| r.embedding.len()).unwrap_or(0);
        if records.iter().any(|r| r.embedding.len() != dimension) {
            return Err(TicketlineError::Index(
                "Embedder returned vectors of differing dimension".into(),
            ));
        }

        Ok(IndexFile {
            model: self.embedder.model_name().to_string(),
            dimension,
            built_at: Utc::now(),
            records,
        })
    }
}
