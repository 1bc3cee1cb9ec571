//! Configuration for the Redmine, metadata and web search sources.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedmineConfig {
    /// Falls back to REDMINE_API_BASE_URL.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Falls back to REDMINE_API_KEY.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// `limit` sent on list endpoints.
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_page_limit() -> u32 {
    100
}

impl Default for RedmineConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            timeout_ms: default_timeout_ms(),
            page_limit: default_page_limit(),
        }
    }
}

impl RedmineConfig {
    pub fn resolve_base_url(&self) -> Option<String> {
        resolve(&self.base_url, "REDMINE_API_BASE_URL")
    }

    pub fn resolve_api_key(&self) -> Option<String> {
        resolve(&self.api_key, "REDMINE_API_KEY")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// Snapshot written by `fetch-metadata`.
    #[serde(default = "default_metadata_path")]
    pub path: PathBuf,
}

fn default_metadata_path() -> PathBuf {
    PathBuf::from("data/redmine_metadata.json")
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            path: default_metadata_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSearchConfig {
    /// Falls back to TAVILY_API_KEY. Without a key web search is disabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_search_url")]
    pub api_url: String,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// "basic" or "advanced"
    #[serde(default = "default_search_depth")]
    pub search_depth: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_search_url() -> String {
    "https://api.tavily.com".into()
}

fn default_max_results() -> usize {
    5
}

fn default_search_depth() -> String {
    "basic".into()
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_search_url(),
            max_results: default_max_results(),
            search_depth: default_search_depth(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl WebSearchConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve(&self.api_key, "TAVILY_API_KEY")
    }
}

fn resolve(explicit: &Option<String>, env_var: &str) -> Option<String> {
    explicit
        .clone()
        .filter(|v| !v.is_empty())
        .or_else(|| std::env::var(env_var).ok().filter(|v| !v.is_empty()))
}
