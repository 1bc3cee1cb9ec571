//! Offline tooling behind the `fetch-metadata` and `build-index` subcommands,
//! plus the background session eviction used by `serve`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use ticketline_coordinator::AppConfig;
use ticketline_memory::{build_embedder, ConversationStore, IndexBuilder, IndexDocument, IndexFile};
use ticketline_sources::{Collection, MetadataSnapshot, RedmineClient, TicketApi};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Pull reference data and issues from Redmine and write the snapshot file.
pub async fn fetch_metadata(
    config: &AppConfig,
    output: &Path,
    issue_limit: u32,
) -> anyhow::Result<MetadataSnapshot> {
    let client = RedmineClient::from_config(&config.redmine, config.retry.clone())?
        .context("Redmine is not configured; set REDMINE_API_BASE_URL and REDMINE_API_KEY")?;

    fetch_metadata_from(&client, output, issue_limit).await
}

pub async fn fetch_metadata_from(
    api: &dyn TicketApi,
    output: &Path,
    issue_limit: u32,
) -> anyhow::Result<MetadataSnapshot> {
    let user = api.validate_connection().await?;
    info!(login = %user.login, base_url = %api.base_url(), "Connected to Redmine");

    let snapshot = MetadataSnapshot::fetch(api, issue_limit).await?;
    snapshot.save_file(output).await?;

    for collection in Collection::ALL {
        info!(
            collection = %collection,
            count = snapshot.table(collection).len(),
            "Fetched"
        );
    }
    info!(
        issues = snapshot.issues.len(),
        path = %output.display(),
        "Metadata snapshot written"
    );
    Ok(snapshot)
}

/// Embed every issue in the snapshot file and write the index file.
pub async fn build_index(
    config: &AppConfig,
    snapshot_path: &Path,
    output: &Path,
    batch_size: usize,
) -> anyhow::Result<IndexFile> {
    let snapshot = MetadataSnapshot::load_file(snapshot_path)
        .await
        .with_context(|| format!("Failed to read snapshot '{}'", snapshot_path.display()))?;

    let documents = index_documents(&snapshot)?;
    if documents.is_empty() {
        anyhow::bail!(
            "Snapshot '{}' holds no issues; run fetch-metadata first",
            snapshot_path.display()
        );
    }
    info!(documents = documents.len(), "Embedding issues");

    let embedder = build_embedder(&config.vector, config.retry.clone())?;
    let file = IndexBuilder::new(embedder)
        .with_batch_size(batch_size)
        .build(documents)
        .await?;
    file.save(output).await?;
    Ok(file)
}

/// One index document per snapshot issue.
pub fn index_documents(snapshot: &MetadataSnapshot) -> anyhow::Result<Vec<IndexDocument>> {
    let mut documents = Vec::with_capacity(snapshot.issues.len());
    for issue in &snapshot.issues {
        let value = serde_json::to_value(issue)?;
        match IndexDocument::from_issue_json(&value) {
            Some(document) => documents.push(document),
            None => warn!(issue_id = issue.id, "Skipping issue without an id"),
        }
    }
    Ok(documents)
}

/// Periodically drop sessions idle for longer than the configured limit.
///
/// Returns `None` when eviction is disabled.
pub fn spawn_session_eviction(
    memory: Arc<ConversationStore>,
    idle_secs: u64,
    interval_secs: u64,
) -> Option<JoinHandle<()>> {
    if idle_secs == 0 || interval_secs == 0 {
        return None;
    }
    let max_idle = Duration::from_secs(idle_secs);

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            ticker.tick().await;
            let evicted = memory.evict_idle(max_idle).await;
            debug!(evicted, "Idle session sweep");
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ticketline_common::Turn;

    #[tokio::test]
    async fn eviction_disabled_by_zero_settings() {
        let memory = Arc::new(ConversationStore::new(10));
        assert!(spawn_session_eviction(memory.clone(), 0, 60).is_none());
        assert!(spawn_session_eviction(memory, 60, 0).is_none());
    }

    #[tokio::test]
    async fn eviction_task_drops_idle_sessions() {
        let memory = Arc::new(ConversationStore::new(10));
        memory
            .append_exchange("idle", Turn::user("hi"), Turn::assistant("hello"))
            .await;

        let handle = spawn_session_eviction(memory.clone(), 1, 1).unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        handle.abort();

        assert_eq!(memory.session_count().await, 0);
    }
}
