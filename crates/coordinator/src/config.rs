//! Application configuration.
//!
//! One TOML file with a section per component; every field has a default so
//! an empty file (or no file) is a valid configuration. Secrets are better
//! supplied through the environment variables each section falls back to.
//!
//! On Unix the file is refused when it is world-writable, or world-readable
//! while holding an API key.

use std::path::Path;

use serde::{Deserialize, Serialize};
use ticketline_common::RetryConfig;
use ticketline_llm::LlmConfig;
use ticketline_memory::{IndexConfig, MemoryConfig};
use ticketline_sources::{MetadataConfig, RedmineConfig, WebSearchConfig};
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmConfig,

    /// Retry policy for Redmine, web search and embedding calls
    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub redmine: RedmineConfig,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub metadata: MetadataConfig,

    #[serde(default)]
    pub vector: IndexConfig,

    #[serde(default)]
    pub web_search: WebSearchConfig,

    #[serde(default)]
    pub router: RouterConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierKind {
    #[default]
    Llm,
    Keyword,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default)]
    pub classifier: ClassifierKind,

    /// Trailing turns shown to the classifier
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
}

fn default_history_turns() -> usize {
    6
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            classifier: ClassifierKind::default(),
            history_turns: default_history_turns(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Whole-request deadline; an expired request leaves memory untouched
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8000
}

fn default_request_timeout_ms() -> u64 {
    120_000
}

fn default_body_limit() -> usize {
    64 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_ms: default_request_timeout_ms(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

impl AppConfig {
    /// Load from a TOML file, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Load from a TOML file after checking its permissions.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();

        #[cfg(unix)]
        validate_config_file_permissions(path)?;

        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config file '{}': {}", path.display(), e))?;

        let inline_secrets = config.inline_secrets();
        if !inline_secrets.is_empty() {
            warn!(
                sections = %inline_secrets.join(", "),
                "API keys found in config file '{}'. Prefer environment variables \
                 (GROQ_API_KEY, REDMINE_API_KEY, TAVILY_API_KEY, EMBEDDING_API_KEY).",
                path.display()
            );
        }

        Ok(config)
    }

    /// Sections that carry an API key inline.
    fn inline_secrets(&self) -> Vec<&'static str> {
        let present = |key: &Option<String>| key.as_deref().is_some_and(|k| !k.is_empty());
        let mut sections = Vec::new();
        if present(&self.llm.api_key) {
            sections.push("llm");
        }
        if present(&self.redmine.api_key) {
            sections.push("redmine");
        }
        if present(&self.web_search.api_key) {
            sections.push("web_search");
        }
        if present(&self.vector.embedding_api_key) {
            sections.push("vector");
        }
        sections
    }
}

/// Refuse config files other users can tamper with or read keys from.
#[cfg(unix)]
fn validate_config_file_permissions(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::metadata(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;

    if !metadata.is_file() {
        anyhow::bail!("Config path '{}' is not a regular file.", path.display());
    }

    let permission_bits = metadata.permissions().mode() & 0o777;

    if permission_bits & 0o002 != 0 {
        anyhow::bail!(
            "Config file '{}' is world-writable (mode {:04o}). Fix with: chmod o-w {}",
            path.display(),
            permission_bits,
            path.display()
        );
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;
    let has_api_key = content
        .lines()
        .map(str::trim_start)
        .any(|line| line.starts_with("api_key") || line.starts_with("embedding_api_key"));

    if has_api_key && permission_bits & 0o004 != 0 {
        anyhow::bail!(
            "Config file '{}' contains an API key but is world-readable (mode {:04o}). \
             Fix with: chmod 600 {}",
            path.display(),
            permission_bits,
            path.display()
        );
    }

    if has_api_key && permission_bits & 0o040 != 0 {
        warn!(
            "Config file '{}' contains an API key and is group-readable (mode {:04o}). \
             Consider: chmod 600 {}",
            path.display(),
            permission_bits,
            path.display()
        );
    }

    Ok(())
}
