//! Live Redmine REST API client.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use ticketline_common::{Result, RetryConfig, TicketlineError};
use tracing::{debug, info};

use crate::config::RedmineConfig;
use crate::models::{
    Entity, Issue, IssueFilter, IssueUpdate, NewIssue, StatusFilter, TimeEntry, User,
};

const SERVICE: &str = "redmine";

/// Issues scanned by the default keyword search.
const SEARCH_SCAN_LIMIT: u32 = 100;

/// Operations against a ticketing backend.
///
/// Implemented by [`RedmineClient`]; tests substitute in-memory fakes.
#[async_trait]
pub trait TicketApi: Send + Sync {
    fn base_url(&self) -> &str;

    /// Check credentials by fetching the current user.
    async fn validate_connection(&self) -> Result<User>;

    async fn list_projects(&self) -> Result<Vec<Entity>>;

    async fn list_issues(&self, filter: &IssueFilter) -> Result<Vec<Issue>>;

    /// `None` when the issue does not exist.
    async fn get_issue(&self, id: u64) -> Result<Option<Issue>>;

    async fn create_issue(&self, issue: &NewIssue) -> Result<Issue>;

    async fn update_issue(&self, id: u64, update: &IssueUpdate) -> Result<()>;

    async fn list_time_entries(
        &self,
        project_id: Option<u64>,
        limit: Option<u32>,
    ) -> Result<Vec<TimeEntry>>;

    async fn list_statuses(&self) -> Result<Vec<Entity>>;

    async fn list_priorities(&self) -> Result<Vec<Entity>>;

    async fn list_trackers(&self) -> Result<Vec<Entity>>;

    async fn list_users(&self) -> Result<Vec<User>>;

    /// Keyword search over issues in any status, best matches first.
    async fn search_issues(&self, query: &str, k: usize) -> Result<Vec<Issue>> {
        let issues = self
            .list_issues(&IssueFilter {
                status: StatusFilter::All,
                limit: Some(SEARCH_SCAN_LIMIT),
                ..Default::default()
            })
            .await?;
        Ok(rank_issues(issues, query, k))
    }
}

const STOP_WORDS: &[&str] = &[
    "a", "about", "all", "an", "and", "any", "are", "bug", "bugs", "find", "for", "get", "give",
    "i", "in", "is", "issue", "issues", "like", "list", "me", "my", "of", "on", "or", "please",
    "related", "search", "show", "similar", "the", "ticket", "tickets", "to", "what", "which",
    "with",
];

fn keywords(query: &str) -> Vec<String> {
    let lower = query.to_lowercase();
    let mut seen = HashSet::new();
    lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 1 && !STOP_WORDS.contains(w))
        .filter(|w| seen.insert(*w))
        .map(str::to_string)
        .collect()
}

/// Rank issues by how many query keywords appear in their subject,
/// description and project name. Issues with no hits are dropped.
pub fn rank_issues(issues: Vec<Issue>, query: &str, k: usize) -> Vec<Issue> {
    let words = keywords(query);
    if words.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(usize, Issue)> = issues
        .into_iter()
        .filter_map(|issue| {
            let haystack = format!(
                "{} {} {}",
                issue.subject,
                issue.description.as_deref().unwrap_or_default(),
                issue.project_name()
            )
            .to_lowercase();
            let hits = words.iter().filter(|w| haystack.contains(w.as_str())).count();
            (hits > 0).then_some((hits, issue))
        })
        .collect();

    scored.sort_by(|(a_hits, a), (b_hits, b)| b_hits.cmp(a_hits).then(b.id.cmp(&a.id)));
    scored.into_iter().take(k).map(|(_, issue)| issue).collect()
}

pub struct RedmineClient {
    base_url: String,
    api_key: String,
    page_limit: u32,
    retry: RetryConfig,
    http_client: reqwest::Client,
}

impl RedmineClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
        page_limit: u32,
        retry: RetryConfig,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TicketlineError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            page_limit,
            retry,
            http_client,
        })
    }

    /// Build a client if both base URL and API key resolve, else `None`.
    pub fn from_config(config: &RedmineConfig, retry: RetryConfig) -> Result<Option<Self>> {
        let (Some(base_url), Some(api_key)) = (config.resolve_base_url(), config.resolve_api_key())
        else {
            return Ok(None);
        };

        let client = Self::new(
            base_url,
            api_key,
            Duration::from_millis(config.timeout_ms),
            config.page_limit,
            retry,
        )?;
        info!(base_url = %client.base_url, "Initialized Redmine client");
        Ok(Some(client))
    }

    /// Send one request, retrying transient failures.
    ///
    /// Returns `None` for a 404 when `allow_missing` is set; an empty body
    /// yields `Value::Null`.
    async fn execute(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
        allow_missing: bool,
    ) -> Result<Option<Value>> {
        let url = format!("{}{}", self.base_url, path);
        let (url, method) = (&url, &method);

        self.retry
            .run(path, move || async move {
                debug!(%method, path, "Redmine request");

                let mut req = self
                    .http_client
                    .request(method.clone(), url)
                    .header("X-Redmine-API-Key", &self.api_key)
                    .query(query);
                if let Some(body) = body {
                    req = req.json(body);
                }

                let response = req
                    .send()
                    .await
                    .map_err(|e| TicketlineError::transport(SERVICE, e))?;

                let status = response.status();
                if status == StatusCode::NOT_FOUND && allow_missing {
                    return Ok(None);
                }

                let text = response
                    .text()
                    .await
                    .map_err(|e| TicketlineError::transport(SERVICE, e))?;

                if !status.is_success() {
                    return Err(TicketlineError::from_status(
                        SERVICE,
                        status.as_u16(),
                        &error_detail(&text),
                    ));
                }

                if text.trim().is_empty() {
                    return Ok(Some(Value::Null));
                }
                Ok(Some(serde_json::from_str(&text)?))
            })
            .await
    }

    async fn get_field<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        field: &str,
    ) -> Result<T> {
        let body = self
            .execute(Method::GET, path, query, None, false)
            .await?
            .unwrap_or(Value::Null);
        take_field(body, field)
    }

    fn limit(&self, limit: Option<u32>) -> (&'static str, String) {
        ("limit", limit.unwrap_or(self.page_limit).to_string())
    }
}

/// Pull `field` out of a Redmine envelope such as `{"issues": [...]}`.
fn take_field<T: DeserializeOwned>(mut body: Value, field: &str) -> Result<T> {
    let value = body
        .get_mut(field)
        .map(Value::take)
        .ok_or_else(|| {
            TicketlineError::UpstreamUnavailable(format!(
                "{SERVICE} response is missing `{field}`"
            ))
        })?;
    Ok(serde_json::from_value(value)?)
}

/// Redmine reports validation failures as `{"errors": ["..."]}`.
fn error_detail(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Some(errors) = value.get("errors").and_then(|e| e.as_array()) {
            let messages: Vec<&str> = errors.iter().filter_map(|e| e.as_str()).collect();
            if !messages.is_empty() {
                return messages.join("; ");
            }
        }
    }
    body.chars().take(200).collect()
}

#[async_trait]
impl TicketApi for RedmineClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn validate_connection(&self) -> Result<User> {
        self.get_field("/users/current.json", &[], "user").await
    }

    async fn list_projects(&self) -> Result<Vec<Entity>> {
        self.get_field("/projects.json", &[self.limit(None)], "projects")
            .await
    }

    async fn list_issues(&self, filter: &IssueFilter) -> Result<Vec<Issue>> {
        let mut query = vec![
            self.limit(filter.limit),
            ("status_id", filter.status.as_param()),
        ];
        if let Some(id) = filter.project_id {
            query.push(("project_id", id.to_string()));
        }
        if let Some(id) = filter.assigned_to_id {
            query.push(("assigned_to_id", id.to_string()));
        }
        if let Some(id) = filter.tracker_id {
            query.push(("tracker_id", id.to_string()));
        }
        self.get_field("/issues.json", &query, "issues").await
    }

    async fn get_issue(&self, id: u64) -> Result<Option<Issue>> {
        let path = format!("/issues/{id}.json");
        match self.execute(Method::GET, &path, &[], None, true).await? {
            Some(body) => Ok(Some(take_field(body, "issue")?)),
            None => Ok(None),
        }
    }

    async fn create_issue(&self, issue: &NewIssue) -> Result<Issue> {
        let body = json!({ "issue": issue });
        let response = self
            .execute(Method::POST, "/issues.json", &[], Some(&body), false)
            .await?
            .unwrap_or(Value::Null);
        let created: Issue = take_field(response, "issue")?;
        info!(issue_id = created.id, project_id = issue.project_id, "Created issue");
        Ok(created)
    }

    async fn update_issue(&self, id: u64, update: &IssueUpdate) -> Result<()> {
        if update.is_empty() {
            return Err(TicketlineError::InvalidRequest(format!(
                "Nothing to update on issue #{id}"
            )));
        }
        let path = format!("/issues/{id}.json");
        let body = json!({ "issue": update });
        self.execute(Method::PUT, &path, &[], Some(&body), false)
            .await?;
        info!(issue_id = id, "Updated issue");
        Ok(())
    }

    async fn list_time_entries(
        &self,
        project_id: Option<u64>,
        limit: Option<u32>,
    ) -> Result<Vec<TimeEntry>> {
        let mut query = vec![self.limit(limit)];
        if let Some(id) = project_id {
            query.push(("project_id", id.to_string()));
        }
        self.get_field("/time_entries.json", &query, "time_entries")
            .await
    }

    async fn list_statuses(&self) -> Result<Vec<Entity>> {
        self.get_field("/issue_statuses.json", &[], "issue_statuses")
            .await
    }

    async fn list_priorities(&self) -> Result<Vec<Entity>> {
        self.get_field(
            "/enumerations/issue_priorities.json",
            &[],
            "issue_priorities",
        )
        .await
    }

    async fn list_trackers(&self) -> Result<Vec<Entity>> {
        self.get_field("/trackers.json", &[], "trackers").await
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        self.get_field("/users.json", &[self.limit(None)], "users")
            .await
    }
}
