//! Redmine reference data cache.
//!
//! The snapshot is loaded from the JSON file written by `fetch-metadata`
//! (or fetched live) and never mutated; a refresh builds a new snapshot and
//! swaps the `Arc`, so readers keep whatever snapshot they already hold.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use ticketline_common::{Result, TicketlineError};
use tracing::{info, warn};

use crate::models::{Entity, Issue, IssueFilter, StatusFilter};
use crate::redmine::TicketApi;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Projects,
    Statuses,
    Priorities,
    Trackers,
}

impl Collection {
    pub const ALL: [Collection; 4] = [
        Collection::Projects,
        Collection::Statuses,
        Collection::Priorities,
        Collection::Trackers,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Projects => "projects",
            Self::Statuses => "statuses",
            Self::Priorities => "priorities",
            Self::Trackers => "trackers",
        }
    }

    /// Key under `endpoints` in the snapshot file.
    fn endpoint_key(&self) -> &'static str {
        match self {
            Self::Projects => "getProjects",
            Self::Statuses => "getIssueStatuses",
            Self::Priorities => "getPriorities",
            Self::Trackers => "getTrackers",
        }
    }

    fn title(&self) -> &'static str {
        match self {
            Self::Projects => "Projects",
            Self::Statuses => "Issue Statuses",
            Self::Priorities => "Priorities",
            Self::Trackers => "Trackers",
        }
    }

    /// Words in a query that ask about this collection.
    fn keywords(&self) -> &'static [&'static str] {
        match self {
            Self::Projects => &["project", "projects"],
            Self::Statuses => &["status", "statuses"],
            Self::Priorities => &["priority", "priorities"],
            Self::Trackers => &["tracker", "trackers"],
        }
    }

    pub fn mentioned_in(&self, query_lower: &str) -> bool {
        self.keywords().iter().any(|k| query_lower.contains(k))
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = TicketlineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "projects" | "project" => Ok(Self::Projects),
            "statuses" | "status" | "issue_statuses" => Ok(Self::Statuses),
            "priorities" | "priority" | "issue_priorities" => Ok(Self::Priorities),
            "trackers" | "tracker" => Ok(Self::Trackers),
            other => Err(TicketlineError::InvalidRequest(format!(
                "Unknown metadata collection: {other}"
            ))),
        }
    }
}

/// Entities keyed by id with a lowercase name index.
#[derive(Debug, Clone, Default)]
pub struct EntityTable {
    by_id: BTreeMap<u64, Entity>,
    by_name: HashMap<String, u64>,
}

impl EntityTable {
    pub fn new(entities: Vec<Entity>) -> Self {
        let mut table = Self::default();
        for entity in entities {
            table
                .by_name
                .entry(entity.name.to_lowercase())
                .or_insert(entity.id);
            table.by_id.insert(entity.id, entity);
        }
        table
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn get(&self, id: u64) -> Option<&Entity> {
        self.by_id.get(&id)
    }

    /// Exact case-insensitive match, else the lowest-id partial match.
    pub fn find_by_name(&self, name: &str) -> Option<&Entity> {
        let needle = name.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }
        if let Some(id) = self.by_name.get(&needle) {
            return self.by_id.get(id);
        }
        self.by_id
            .values()
            .find(|e| e.name.to_lowercase().contains(&needle))
    }

    /// Entities ordered by id.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.by_id.values()
    }
}

/// Immutable reference data snapshot.
#[derive(Debug, Clone, Default)]
pub struct MetadataSnapshot {
    pub base_url: Option<String>,
    pub fetched_at: Option<String>,
    pub projects: EntityTable,
    pub statuses: EntityTable,
    pub priorities: EntityTable,
    pub trackers: EntityTable,
    /// Issues captured with the snapshot; used to build the similarity index.
    pub issues: Vec<Issue>,
}

fn endpoint_data(root: &Value, key: &str) -> Option<Value> {
    let data = root.get("endpoints")?.get(key)?.get("data")?;
    if data.is_null() {
        None
    } else {
        Some(data.clone())
    }
}

fn parse_entities(root: &Value, collection: Collection) -> Result<Vec<Entity>> {
    match endpoint_data(root, collection.endpoint_key()) {
        Some(data) => Ok(serde_json::from_value(data)?),
        None => Ok(Vec::new()),
    }
}

impl MetadataSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_collections(
        projects: Vec<Entity>,
        statuses: Vec<Entity>,
        priorities: Vec<Entity>,
        trackers: Vec<Entity>,
    ) -> Self {
        Self {
            projects: EntityTable::new(projects),
            statuses: EntityTable::new(statuses),
            priorities: EntityTable::new(priorities),
            trackers: EntityTable::new(trackers),
            ..Self::default()
        }
    }

    pub fn with_source(mut self, base_url: impl Into<String>, fetched_at: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self.fetched_at = Some(fetched_at.into());
        self
    }

    pub fn with_issues(mut self, issues: Vec<Issue>) -> Self {
        self.issues = issues;
        self
    }

    /// Parse the `{fetched_at, base_url, endpoints: {...}}` snapshot format.
    ///
    /// Endpoints that failed during the fetch (no `data`) load as empty.
    pub fn from_json(root: &Value) -> Result<Self> {
        let text = |key: &str| root.get(key).and_then(|v| v.as_str()).map(str::to_string);

        let issues = match endpoint_data(root, "getIssues") {
            Some(data) => serde_json::from_value(data)?,
            None => Vec::new(),
        };

        Ok(Self {
            base_url: text("base_url"),
            fetched_at: text("fetched_at"),
            projects: EntityTable::new(parse_entities(root, Collection::Projects)?),
            statuses: EntityTable::new(parse_entities(root, Collection::Statuses)?),
            priorities: EntityTable::new(parse_entities(root, Collection::Priorities)?),
            trackers: EntityTable::new(parse_entities(root, Collection::Trackers)?),
            issues,
        })
    }

    pub fn to_json(&self) -> Value {
        let base_url = self.base_url.clone().unwrap_or_default();
        let endpoint = |data: Value| json!({"status": "success", "data": data});
        let entities = |table: &EntityTable| json!(table.iter().collect::<Vec<_>>());

        json!({
            "fetched_at": self.fetched_at,
            "base_url": base_url,
            "endpoints": {
                "getProjects": endpoint(entities(&self.projects)),
                "getIssueStatuses": endpoint(entities(&self.statuses)),
                "getPriorities": endpoint(entities(&self.priorities)),
                "getTrackers": endpoint(entities(&self.trackers)),
                "getIssues": endpoint(json!(self.issues)),
            }
        })
    }

    /// Fetch every collection (and all issues) from the live API.
    pub async fn fetch(api: &dyn TicketApi, issue_limit: u32) -> Result<Self> {
        let projects = api.list_projects().await?;
        let statuses = api.list_statuses().await?;
        let priorities = api.list_priorities().await?;
        let trackers = api.list_trackers().await?;
        let issues = api
            .list_issues(&IssueFilter {
                status: StatusFilter::All,
                limit: Some(issue_limit),
                ..Default::default()
            })
            .await?;

        Ok(
            Self::from_collections(projects, statuses, priorities, trackers)
                .with_source(api.base_url(), Utc::now().to_rfc3339())
                .with_issues(issues),
        )
    }

    pub async fn load_file(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        let root: Value = serde_json::from_str(&raw)?;
        Self::from_json(&root)
    }

    pub async fn save_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(&self.to_json())?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    pub fn table(&self, collection: Collection) -> &EntityTable {
        match collection {
            Collection::Projects => &self.projects,
            Collection::Statuses => &self.statuses,
            Collection::Priorities => &self.priorities,
            Collection::Trackers => &self.trackers,
        }
    }

    pub fn is_empty(&self) -> bool {
        Collection::ALL.iter().all(|c| self.table(*c).is_empty())
    }
}

/// Process-wide holder of the current [`MetadataSnapshot`].
pub struct MetadataCache {
    snapshot: RwLock<Arc<MetadataSnapshot>>,
}

impl MetadataCache {
    pub fn new(snapshot: MetadataSnapshot) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(snapshot)),
        }
    }

    pub fn empty() -> Self {
        Self::new(MetadataSnapshot::empty())
    }

    /// Load from `path`; a missing file yields an empty cache.
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "Metadata file not found; starting with empty cache");
            return Ok(Self::empty());
        }
        let snapshot = MetadataSnapshot::load_file(path).await?;
        log_loaded(&snapshot, path.display());
        Ok(Self::new(snapshot))
    }

    /// The current snapshot. Holding it keeps it alive across refreshes.
    pub fn snapshot(&self) -> Arc<MetadataSnapshot> {
        self.snapshot.read().clone()
    }

    pub fn swap(&self, snapshot: MetadataSnapshot) -> Arc<MetadataSnapshot> {
        std::mem::replace(&mut *self.snapshot.write(), Arc::new(snapshot))
    }

    pub async fn reload_from_file(&self, path: &Path) -> Result<()> {
        let snapshot = MetadataSnapshot::load_file(path).await?;
        log_loaded(&snapshot, path.display());
        self.swap(snapshot);
        Ok(())
    }

    pub async fn refresh_from_api(&self, api: &dyn TicketApi, issue_limit: u32) -> Result<()> {
        let snapshot = MetadataSnapshot::fetch(api, issue_limit).await?;
        log_loaded(&snapshot, api.base_url());
        self.swap(snapshot);
        Ok(())
    }

    pub fn lookup_by_name(&self, collection: Collection, name: &str) -> Option<Entity> {
        self.snapshot().table(collection).find_by_name(name).cloned()
    }

    pub fn lookup_by_id(&self, collection: Collection, id: u64) -> Option<Entity> {
        self.snapshot().table(collection).get(id).cloned()
    }

    pub fn list_all(&self, collection: Collection) -> Vec<Entity> {
        self.snapshot().table(collection).iter().cloned().collect()
    }

    pub fn counts(&self) -> HashMap<&'static str, usize> {
        let snapshot = self.snapshot();
        Collection::ALL
            .iter()
            .map(|c| (c.as_str(), snapshot.table(*c).len()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Projects whose name, description or identifier contains `query`.
    pub fn search_projects(&self, query: &str) -> Vec<Entity> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        let contains = |field: &Option<String>| {
            field
                .as_deref()
                .map(|v| v.to_lowercase().contains(&needle))
                .unwrap_or(false)
        };
        self.snapshot()
            .projects
            .iter()
            .filter(|p| {
                p.name.to_lowercase().contains(&needle)
                    || contains(&p.description)
                    || contains(&p.identifier)
            })
            .cloned()
            .collect()
    }

    /// Human-readable listing of one collection.
    pub fn format_collection(&self, collection: Collection) -> String {
        format_table(collection, self.snapshot().table(collection))
    }

    /// Listings for every collection the query mentions, plus the first
    /// project named in it. Empty when nothing relevant is found.
    pub fn context_for_query(&self, query: &str) -> String {
        let snapshot = self.snapshot();
        let query_lower = query.to_lowercase();

        let mut parts: Vec<String> = Collection::ALL
            .iter()
            .filter(|c| c.mentioned_in(&query_lower))
            .map(|c| format_table(*c, snapshot.table(*c)))
            .collect();

        if let Some(project) = snapshot
            .projects
            .iter()
            .find(|p| query_lower.contains(&p.name.to_lowercase()))
        {
            parts.push(format!(
                "Project Context: {} (ID: {})",
                project.name, project.id
            ));
        }

        parts.join("\n\n")
    }

    /// Instance overview included in every response prompt.
    pub fn summary(&self) -> String {
        let snapshot = self.snapshot();
        let mut parts = vec![
            format!(
                "Redmine Instance: {}",
                snapshot.base_url.as_deref().unwrap_or("N/A")
            ),
            format!(
                "Last Updated: {}",
                snapshot.fetched_at.as_deref().unwrap_or("N/A")
            ),
            String::new(),
            "Available Resources:".to_string(),
        ];
        for collection in Collection::ALL {
            parts.push(format!(
                "• {}: {}",
                collection.title(),
                snapshot.table(collection).len()
            ));
        }
        for collection in [
            Collection::Statuses,
            Collection::Priorities,
            Collection::Trackers,
        ] {
            parts.push(String::new());
            parts.push(format_table(collection, snapshot.table(collection)));
        }
        parts.join("\n")
    }
}

fn log_loaded(snapshot: &MetadataSnapshot, source: impl fmt::Display) {
    info!(
        source = %source,
        projects = snapshot.projects.len(),
        statuses = snapshot.statuses.len(),
        priorities = snapshot.priorities.len(),
        trackers = snapshot.trackers.len(),
        issues = snapshot.issues.len(),
        "Loaded Redmine metadata"
    );
}

/// Listing of entities fetched outside the cache, in the cache's format.
pub fn format_entities(collection: Collection, entities: Vec<Entity>) -> String {
    format_table(collection, &EntityTable::new(entities))
}

fn format_table(collection: Collection, table: &EntityTable) -> String {
    if table.is_empty() {
        return format!("No {} available.", collection.as_str());
    }

    let mut lines = vec![format!("Available {} ({}):", collection.title(), table.len())];
    for entity in table.iter() {
        match collection {
            Collection::Projects => {
                lines.push(format!("• **{}** (ID: {})", entity.name, entity.id));
                lines.push(format!(
                    "  Identifier: {}",
                    entity.identifier.as_deref().unwrap_or("N/A")
                ));
                let description: String = entity
                    .description
                    .as_deref()
                    .filter(|d| !d.is_empty())
                    .unwrap_or("No description")
                    .chars()
                    .take(100)
                    .collect();
                lines.push(format!("  Description: {description}"));
            }
            _ => lines.push(format!("• {} (ID: {})", entity.name, entity.id)),
        }
    }
    lines.join("\n")
}
