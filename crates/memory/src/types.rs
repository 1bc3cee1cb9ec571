//! Memory types and configuration.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Configuration for per-session conversation memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Maximum turns kept per session; older turns are dropped first.
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,

    /// Sessions idle for longer than this are evicted. Zero disables eviction.
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,

    /// How often the eviction sweep runs.
    #[serde(default = "default_eviction_interval_secs")]
    pub eviction_interval_secs: u64,
}

fn default_max_turns() -> usize {
    20
}

fn default_session_idle_secs() -> u64 {
    24 * 60 * 60
}

fn default_eviction_interval_secs() -> u64 {
    300
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            session_idle_secs: default_session_idle_secs(),
            eviction_interval_secs: default_eviction_interval_secs(),
        }
    }
}

/// Configuration for the issue similarity index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Index file written by `build-index`. No path means no index.
    #[serde(default = "default_index_path")]
    pub path: Option<PathBuf>,

    /// "http" (OpenAI-compatible embeddings endpoint) or "local".
    #[serde(default = "default_embedding_provider")]
    pub embedding_provider: String,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_embedding_api_url")]
    pub embedding_api_url: String,

    /// Falls back to EMBEDDING_API_KEY, then OPENAI_API_KEY.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_api_key: Option<String>,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Results returned by a similarity search when the caller has no preference.
    #[serde(default = "default_k")]
    pub default_k: usize,
}

fn default_index_path() -> Option<PathBuf> {
    Some(PathBuf::from("data/issue_index.json"))
}

fn default_embedding_provider() -> String {
    "http".into()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}

fn default_embedding_api_url() -> String {
    "https://api.openai.com".into()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_k() -> usize {
    5
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
            embedding_provider: default_embedding_provider(),
            embedding_model: default_embedding_model(),
            embedding_api_url: default_embedding_api_url(),
            embedding_api_key: None,
            timeout_ms: default_timeout_ms(),
            default_k: default_k(),
        }
    }
}

impl IndexConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(ref key) = self.embedding_api_key {
            if !key.is_empty() {
                return Some(key.clone());
            }
        }
        ["EMBEDDING_API_KEY", "OPENAI_API_KEY"]
            .iter()
            .find_map(|var| std::env::var(var).ok().filter(|k| !k.is_empty()))
    }
}

/// Public view of a session, without its turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Messages ever appended, including ones already trimmed away.
    pub message_count: u64,
    /// Turns currently retained.
    pub turn_count: usize,
}

/// An issue ready to be embedded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub issue_id: u64,
    pub subject: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub tracker: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub priority: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_on: Option<String>,
    /// Text that was embedded.
    pub content: String,
}

impl IndexDocument {
    /// Build a document from a raw Redmine issue object.
    ///
    /// Returns `None` when the object has no numeric `id`.
    pub fn from_issue_json(issue: &serde_json::Value) -> Option<Self> {
        let issue_id = issue.get("id")?.as_u64()?;
        let text = |key: &str| {
            issue
                .get(key)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        let named = |key: &str| {
            issue
                .get(key)
                .and_then(|v| v.get("name"))
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };

        let subject = text("subject");
        let description = text("description");
        let project = named("project");
        let tracker = named("tracker");
        let status = named("status");
        let priority = named("priority");

        let mut content = format!(
            "Issue #{issue_id}: {subject}\nProject: {project}\nTracker: {tracker}\nStatus: {status}\nPriority: {priority}"
        );
        if !description.is_empty() {
            content.push_str("\nDescription: ");
            content.push_str(&description);
        }

        Some(Self {
            issue_id,
            subject,
            project,
            tracker,
            status,
            priority,
            created_on: issue
                .get("created_on")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            content,
        })
    }
}

/// A document with its embedding, as stored in the index file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedRecord {
    #[serde(flatten)]
    pub document: IndexDocument,
    pub embedding: Vec<f32>,
}

/// A search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRecord {
    pub document: IndexDocument,
    /// Cosine similarity in [-1, 1]; higher is closer.
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SimilarityOutcome {
    /// No index loaded, the index is empty, or the query could not be embedded.
    Unavailable,
    /// Hits in non-increasing score order.
    Matches(Vec<ScoredRecord>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub available: bool,
    pub record_count: usize,
    pub dimension: usize,
    pub model: Option<String>,
    pub built_at: Option<DateTime<Utc>>,
}
