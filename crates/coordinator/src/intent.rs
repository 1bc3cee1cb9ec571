//! Mapping a `ticket_api` message onto one Redmine operation.
//!
//! Rules are tried in order: create, update (needs an issue number),
//! lookup by issue number, time entries, project search, unscoped
//! reference data, issue listing, users, then reference data named
//! alongside a scope. Anything left over becomes a keyword search. Create and update fields
//! come from one JSON-mode LLM call; names are resolved through the
//! metadata cache so the API only ever sees ids.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Deserialize;
use ticketline_common::Result;
use ticketline_llm::{ChatMessage, LlmClient, LlmRequest};
use ticketline_sources::{
    format_entities, Collection, Entity, IssueFilter, IssueUpdate, MetadataCache, NewIssue,
    StatusFilter, TicketApi, User,
};
use tracing::{debug, info, warn};

use crate::classifier::extract_json_object;
use crate::retrieval::RetrievalResult;

const TIME_ENTRY_LIMIT: u32 = 50;
const SEARCH_LIMIT: usize = 10;

/// Priority ids used when the cache has no priority of that name.
const PRIORITY_MAP: &[(&str, u64)] = &[
    ("low", 1),
    ("normal", 2),
    ("high", 3),
    ("urgent", 4),
    ("immediate", 5),
];
const DEFAULT_PRIORITY_ID: u64 = 2;

static ISSUE_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:#\s*|\b(?:issue|ticket|bug|task)\s+(?:#\s*|number\s+|no\.?\s*)?)(\d+)\b")
        .expect("issue number regex is valid")
});

static CREATE_WORDING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:create|add|file|raise|submit|log|report)\s+(?:a\s+|an\s+|new\s+)*(?:issue|ticket|bug|task|feature)s?\b|\bopen\s+(?:a|an|new)\s+(?:new\s+)?(?:issue|ticket|bug|task)\b|\bnew\s+(?:issue|ticket|bug|task)\b",
    )
    .expect("create wording regex is valid")
});

static UPDATE_WORDING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:update|change|set|close|reopen|modify|edit|mark|rename|comment on|add (?:a )?note)\b")
        .expect("update wording regex is valid")
});

static TIME_WORDING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:time entr(?:y|ies)|hours|time spent|spent time|logged time|timesheets?|time logs?)\b")
        .expect("time wording regex is valid")
});

static ISSUE_WORDING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:issues?|tickets?|bugs?|tasks?)\b")
        .expect("issue wording regex is valid")
});

static PROJECT_SEARCH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:find|search(?:\s+for)?|look(?:ing)?\s+for)\s+(?:the\s+|any\s+|a\s+)?projects?\s+(?:about|on|for|named|called|matching|mentioning|involving|related\s+to)\s+(.+?)[\s?.!]*$",
    )
    .expect("project search regex is valid")
});

/// Wording that narrows a question to some subset of issues.
static STATUS_SCOPING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:open|closed|resolved|all|any|every)\b")
        .expect("status scoping regex is valid")
});

static USERS_WORDING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:users|team members|members|assignees|who works)\b")
        .expect("users wording regex is valid")
});

/// The single operation a `ticket_api` message resolves to.
#[derive(Debug, Clone, PartialEq)]
pub enum TicketIntent {
    GetIssue(u64),
    CreateIssue(NewIssue),
    UpdateIssue {
        id: u64,
        update: IssueUpdate,
        /// Human-readable list of the requested changes
        changes: Vec<String>,
    },
    TimeEntries {
        project_id: Option<u64>,
    },
    ListIssues(IssueFilter),
    Reference(Collection),
    /// Cached projects whose name, identifier or description matches.
    SearchProjects(String),
    ListUsers,
    Search(String),
    /// Parameters were missing or unknown; no call is made.
    Clarify(String),
}

#[derive(Debug, Default, Deserialize)]
struct ExtractedFields {
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    tracker: Option<String>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    notes: Option<String>,
}

impl ExtractedFields {
    fn clean(value: Option<String>) -> Option<String> {
        value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("null"))
    }

    fn normalized(self) -> Self {
        Self {
            project: Self::clean(self.project),
            subject: Self::clean(self.subject),
            description: Self::clean(self.description),
            tracker: Self::clean(self.tracker),
            priority: Self::clean(self.priority),
            status: Self::clean(self.status),
            notes: Self::clean(self.notes),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mutation {
    Create,
    Update,
}

fn extraction_prompt(mutation: Mutation) -> String {
    let action = match mutation {
        Mutation::Create => "create a new Redmine issue",
        Mutation::Update => "update an existing Redmine issue",
    };
    format!(
        "The user wants to {action}. Extract the fields they stated.\n\n\
         Respond with a single JSON object and nothing else:\n\
         {{\"project\": string|null, \"subject\": string|null, \"description\": string|null, \
         \"tracker\": string|null, \"priority\": string|null, \"status\": string|null, \
         \"notes\": string|null}}\n\n\
         Use names exactly as the user wrote them. Use null for anything not stated; never invent values."
    )
}

pub struct IntentResolver {
    llm: Arc<dyn LlmClient>,
    metadata: Arc<MetadataCache>,
}

impl IntentResolver {
    pub fn new(llm: Arc<dyn LlmClient>, metadata: Arc<MetadataCache>) -> Self {
        Self { llm, metadata }
    }

    pub async fn resolve(&self, message: &str) -> Result<TicketIntent> {
        let issue_number = issue_number(message);

        let intent = if CREATE_WORDING.is_match(message) {
            let fields = self.extract(message, Mutation::Create).await?;
            match fields {
                Some(fields) => self.create_intent(message, fields),
                None => unreadable_fields(),
            }
        } else if let (Some(id), true) = (issue_number, UPDATE_WORDING.is_match(message)) {
            let fields = self.extract(message, Mutation::Update).await?;
            match fields {
                Some(fields) => self.update_intent(id, fields),
                None => unreadable_fields(),
            }
        } else if let Some(id) = issue_number {
            TicketIntent::GetIssue(id)
        } else if TIME_WORDING.is_match(message) {
            TicketIntent::TimeEntries {
                project_id: self.mentioned_project(message).map(|p| p.id),
            }
        } else if let Some(query) = project_search(message) {
            TicketIntent::SearchProjects(query)
        } else if let Some(collection) = self.reference_question(message) {
            TicketIntent::Reference(collection)
        } else if ISSUE_WORDING.is_match(message) {
            TicketIntent::ListIssues(self.issue_filter(message))
        } else if USERS_WORDING.is_match(message) {
            TicketIntent::ListUsers
        } else if let Some(collection) = mentioned_collection(message) {
            TicketIntent::Reference(collection)
        } else {
            TicketIntent::Search(message.to_string())
        };

        debug!(intent = ?intent, "Resolved ticket intent");
        Ok(intent)
    }

    /// `None` when the model answered with something that is not the
    /// expected JSON object.
    async fn extract(&self, message: &str, mutation: Mutation) -> Result<Option<ExtractedFields>> {
        let response = self
            .llm
            .complete(LlmRequest {
                system_prompt: Some(extraction_prompt(mutation)),
                messages: vec![ChatMessage::user(message)],
                temperature: Some(0.0),
                max_tokens: Some(500),
                json_output: true,
            })
            .await?;

        let parsed = extract_json_object(&response.content)
            .and_then(|json| serde_json::from_str::<ExtractedFields>(json).ok());
        if parsed.is_none() {
            warn!(
                response = %response.content.chars().take(200).collect::<String>(),
                "Could not parse issue fields from model output"
            );
        }
        Ok(parsed.map(ExtractedFields::normalized))
    }

    fn create_intent(&self, message: &str, fields: ExtractedFields) -> TicketIntent {
        let project = match fields.project.as_deref() {
            Some(name) => self.metadata.lookup_by_name(Collection::Projects, name),
            None => self.mentioned_project(message),
        };
        let Some(project) = project else {
            return TicketIntent::Clarify(format!(
                "To create an issue I need to know which project it belongs to. {}",
                self.available(Collection::Projects)
            ));
        };
        let Some(subject) = fields.subject else {
            return TicketIntent::Clarify(format!(
                "What should the subject of the new issue in {} be?",
                project.name
            ));
        };

        let status_id = match fields.status.as_deref() {
            Some(name) => match self.metadata.lookup_by_name(Collection::Statuses, name) {
                Some(status) => Some(status.id),
                None => return self.unknown(Collection::Statuses, name),
            },
            None => None,
        };

        TicketIntent::CreateIssue(NewIssue {
            project_id: project.id,
            subject,
            description: fields.description,
            tracker_id: fields
                .tracker
                .as_deref()
                .and_then(|name| self.metadata.lookup_by_name(Collection::Trackers, name))
                .map(|t| t.id),
            priority_id: fields.priority.as_deref().map(|p| self.priority_id(p)),
            status_id,
        })
    }

    fn update_intent(&self, id: u64, fields: ExtractedFields) -> TicketIntent {
        let mut update = IssueUpdate::default();
        let mut changes = Vec::new();

        if let Some(name) = fields.status.as_deref() {
            match self.metadata.lookup_by_name(Collection::Statuses, name) {
                Some(status) => {
                    update.status_id = Some(status.id);
                    changes.push(format!("status → {}", status.name));
                }
                None => return self.unknown(Collection::Statuses, name),
            }
        }
        if let Some(name) = fields.priority.as_deref() {
            update.priority_id = Some(self.priority_id(name));
            changes.push(format!("priority → {name}"));
        }
        if let Some(subject) = fields.subject {
            changes.push(format!("subject → {subject}"));
            update.subject = Some(subject);
        }
        if let Some(description) = fields.description {
            changes.push("description updated".to_string());
            update.description = Some(description);
        }
        if let Some(notes) = fields.notes {
            changes.push("note added".to_string());
            update.notes = Some(notes);
        }

        if update.is_empty() {
            return TicketIntent::Clarify(format!(
                "What should change on issue #{id}? I can set the status, priority, subject or description, or add a note."
            ));
        }
        TicketIntent::UpdateIssue { id, update, changes }
    }

    fn priority_id(&self, name: &str) -> u64 {
        if let Some(priority) = self.metadata.lookup_by_name(Collection::Priorities, name) {
            return priority.id;
        }
        let lower = name.trim().to_lowercase();
        PRIORITY_MAP
            .iter()
            .find(|(n, _)| *n == lower)
            .map(|(_, id)| *id)
            .unwrap_or(DEFAULT_PRIORITY_ID)
    }

    /// The longest cached project name that appears in the message.
    fn mentioned_project(&self, message: &str) -> Option<Entity> {
        let lower = message.to_lowercase();
        let snapshot = self.metadata.snapshot();
        snapshot
            .projects
            .iter()
            .filter(|p| !p.name.is_empty() && lower.contains(&p.name.to_lowercase()))
            .max_by_key(|p| p.name.len())
            .cloned()
    }

    /// A collection asked about on its own, e.g. "What issue statuses are
    /// available?". A project, status or tracker scope turns the question
    /// into an issue listing instead.
    fn reference_question(&self, message: &str) -> Option<Collection> {
        let collection = mentioned_collection(message)?;
        if collection == Collection::Projects && ISSUE_WORDING.is_match(message) {
            return None;
        }
        let lower = message.to_lowercase();
        let names_tracker = self
            .metadata
            .snapshot()
            .trackers
            .iter()
            .any(|t| !t.name.is_empty() && lower.contains(&t.name.to_lowercase()));
        if names_tracker
            || STATUS_SCOPING.is_match(message)
            || self.mentioned_project(message).is_some()
        {
            return None;
        }
        Some(collection)
    }

    fn issue_filter(&self, message: &str) -> IssueFilter {
        let lower = message.to_lowercase();
        let status = if lower.contains("closed") || lower.contains("resolved") {
            StatusFilter::Closed
        } else if lower.contains("all issues")
            || lower.contains("all tickets")
            || lower.contains("any status")
            || lower.contains("every")
        {
            StatusFilter::All
        } else {
            StatusFilter::Open
        };

        let snapshot = self.metadata.snapshot();
        let tracker_id = snapshot
            .trackers
            .iter()
            .find(|t| !t.name.is_empty() && lower.contains(&t.name.to_lowercase()))
            .map(|t| t.id);

        IssueFilter {
            project_id: self.mentioned_project(message).map(|p| p.id),
            status,
            tracker_id,
            ..Default::default()
        }
    }

    fn available(&self, collection: Collection) -> String {
        let names: Vec<String> = self
            .metadata
            .list_all(collection)
            .into_iter()
            .map(|e| e.name)
            .collect();
        if names.is_empty() {
            format!("No {collection} are cached yet.")
        } else {
            format!("Available {collection}: {}.", names.join(", "))
        }
    }

    fn unknown(&self, collection: Collection, name: &str) -> TicketIntent {
        TicketIntent::Clarify(format!(
            "I don't know a {} called '{name}'. {}",
            singular(collection),
            self.available(collection)
        ))
    }
}

/// First issue reference such as `#123` or `issue 45`.
pub(crate) fn issue_number(message: &str) -> Option<u64> {
    ISSUE_NUMBER
        .captures(message)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

fn unreadable_fields() -> TicketIntent {
    TicketIntent::Clarify(
        "I couldn't work out the issue details. Please state the project, subject and any status or priority.".into(),
    )
}

fn singular(collection: Collection) -> &'static str {
    match collection {
        Collection::Projects => "project",
        Collection::Statuses => "status",
        Collection::Priorities => "priority",
        Collection::Trackers => "tracker",
    }
}

fn project_search(message: &str) -> Option<String> {
    PROJECT_SEARCH
        .captures(message)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|q| !q.is_empty())
}

fn cached_project_search(metadata: &MetadataCache, query: &str) -> RetrievalResult {
    let found = metadata.search_projects(query);
    if found.is_empty() {
        RetrievalResult::Text(format!("No cached projects match '{query}'."))
    } else {
        RetrievalResult::Metadata(format_entities(Collection::Projects, found))
    }
}

fn format_users(users: &[User]) -> String {
    if users.is_empty() {
        return "No users available.".to_string();
    }
    let mut lines = vec![format!("Users ({}):", users.len())];
    for user in users {
        lines.push(format!("• {} ({}, ID: {})", user.display_name(), user.login, user.id));
    }
    lines.join("\n")
}

fn mentioned_collection(message: &str) -> Option<Collection> {
    let lower = message.to_lowercase();
    Collection::ALL.into_iter().find(|c| c.mentioned_in(&lower))
}

const NOT_CONFIGURED: &str =
    "The Redmine API is not configured, so live ticket data is unavailable.";

impl TicketIntent {
    /// Run the operation. Reference data comes from the cache when it has
    /// any, so those questions work without a live API.
    pub async fn execute(
        self,
        api: Option<&dyn TicketApi>,
        metadata: &MetadataCache,
    ) -> Result<RetrievalResult> {
        if let Self::Reference(collection) = &self {
            if !metadata.snapshot().table(*collection).is_empty() {
                return Ok(RetrievalResult::Metadata(
                    metadata.format_collection(*collection),
                ));
            }
        }
        if let Self::Clarify(note) = self {
            return Ok(RetrievalResult::Text(note));
        }
        if let Self::SearchProjects(query) = &self {
            return Ok(cached_project_search(metadata, query));
        }

        let Some(api) = api else {
            return Ok(RetrievalResult::Text(NOT_CONFIGURED.to_string()));
        };

        let result = match self {
            Self::GetIssue(id) => match api.get_issue(id).await? {
                Some(issue) => RetrievalResult::Issue(Box::new(issue)),
                None => RetrievalResult::Text(format!("Issue #{id} was not found.")),
            },
            Self::CreateIssue(new_issue) => {
                let created = api.create_issue(&new_issue).await?;
                info!(issue_id = created.id, project_id = new_issue.project_id, "Created issue");
                RetrievalResult::Mutation(format!(
                    "Created issue #{}: {} (project: {}).",
                    created.id,
                    created.subject,
                    metadata
                        .lookup_by_id(Collection::Projects, new_issue.project_id)
                        .map(|p| p.name)
                        .unwrap_or_else(|| created.project_name().to_string())
                ))
            }
            Self::UpdateIssue { id, update, changes } => {
                api.update_issue(id, &update).await?;
                info!(issue_id = id, "Updated issue");
                RetrievalResult::Mutation(format!(
                    "Updated issue #{id}: {}.",
                    changes.join(", ")
                ))
            }
            Self::TimeEntries { project_id } => RetrievalResult::TimeEntries(
                api.list_time_entries(project_id, Some(TIME_ENTRY_LIMIT))
                    .await?,
            ),
            Self::ListIssues(filter) => RetrievalResult::Tickets(api.list_issues(&filter).await?),
            Self::Reference(collection) => {
                let entities = match collection {
                    Collection::Projects => api.list_projects().await?,
                    Collection::Statuses => api.list_statuses().await?,
                    Collection::Priorities => api.list_priorities().await?,
                    Collection::Trackers => api.list_trackers().await?,
                };
                RetrievalResult::Metadata(format_entities(collection, entities))
            }
            Self::ListUsers => RetrievalResult::Metadata(format_users(&api.list_users().await?)),
            Self::Search(query) => {
                RetrievalResult::Tickets(api.search_issues(&query, SEARCH_LIMIT).await?)
            }
            Self::SearchProjects(query) => cached_project_search(metadata, &query),
            Self::Clarify(note) => RetrievalResult::Text(note),
        };
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ticketline_llm::LlmResponse;
    use ticketline_sources::MetadataSnapshot;

    struct FieldsLlm(&'static str);

    #[async_trait]
    impl LlmClient for FieldsLlm {
        async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
            assert!(request.json_output);
            Ok(LlmResponse {
                content: self.0.to_string(),
                model: "fields".into(),
                usage: None,
                finish_reason: None,
            })
        }

        fn model_name(&self) -> &str {
            "fields"
        }
    }

    fn metadata() -> Arc<MetadataCache> {
        Arc::new(MetadataCache::new(MetadataSnapshot::from_collections(
            vec![
                Entity::new(1, "Customer Portal"),
                Entity::new(2, "Billing"),
                Entity::new(3, "Portal"),
            ],
            vec![Entity::new(1, "New"), Entity::new(5, "Closed")],
            vec![Entity::new(2, "Normal"), Entity::new(4, "Urgent")],
            vec![Entity::new(1, "Bug"), Entity::new(2, "Feature")],
        )))
    }

    fn resolver(reply: &'static str) -> IntentResolver {
        IntentResolver::new(Arc::new(FieldsLlm(reply)), metadata())
    }

    #[test]
    fn issue_number_patterns() {
        assert_eq!(issue_number("show #123"), Some(123));
        assert_eq!(issue_number("what about issue 45?"), Some(45));
        assert_eq!(issue_number("ticket #7 please"), Some(7));
        assert_eq!(issue_number("Find issues similar to issue no. 88"), Some(88));
        assert_eq!(issue_number("list 20 issues"), None);
    }

    #[test]
    fn open_issues_is_not_a_create_request() {
        assert!(!CREATE_WORDING.is_match("Show me open issues in Portal"));
        assert!(!CREATE_WORDING.is_match("any new issues today?"));
        assert!(CREATE_WORDING.is_match("Please open a ticket for the outage"));
        assert!(CREATE_WORDING.is_match("log a bug: export fails"));
    }

    #[tokio::test]
    async fn issue_number_resolves_to_lookup() {
        let intent = resolver("{}").resolve("What's the status of #123?").await.unwrap();
        assert_eq!(intent, TicketIntent::GetIssue(123));
    }

    #[tokio::test]
    async fn listing_is_scoped_by_longest_project_name() {
        let intent = resolver("{}")
            .resolve("Show me closed bugs in Customer Portal")
            .await
            .unwrap();
        match intent {
            TicketIntent::ListIssues(filter) => {
                assert_eq!(filter.project_id, Some(1));
                assert_eq!(filter.status, StatusFilter::Closed);
                assert_eq!(filter.tracker_id, Some(1));
            }
            other => panic!("unexpected intent: {other:?}"),
        }
    }

    #[tokio::test]
    async fn time_and_reference_wording() {
        let r = resolver("{}");
        assert_eq!(
            r.resolve("How many hours were logged on Billing?").await.unwrap(),
            TicketIntent::TimeEntries { project_id: Some(2) }
        );
        assert_eq!(
            r.resolve("What projects do I have?").await.unwrap(),
            TicketIntent::Reference(Collection::Projects)
        );
        assert_eq!(
            r.resolve("Which priorities can I pick?").await.unwrap(),
            TicketIntent::Reference(Collection::Priorities)
        );
    }

    #[tokio::test]
    async fn unscoped_collection_questions_are_reference_lookups() {
        let r = resolver("{}");
        assert_eq!(
            r.resolve("What issue statuses are available?").await.unwrap(),
            TicketIntent::Reference(Collection::Statuses)
        );
        assert_eq!(
            r.resolve("Which priorities can I set on a ticket?").await.unwrap(),
            TicketIntent::Reference(Collection::Priorities)
        );
        assert_eq!(
            r.resolve("What trackers do issues use?").await.unwrap(),
            TicketIntent::Reference(Collection::Trackers)
        );
    }

    #[tokio::test]
    async fn scoped_collection_wording_still_lists_issues() {
        let r = resolver("{}");
        assert!(matches!(
            r.resolve("Show open issues with high priority in Portal").await.unwrap(),
            TicketIntent::ListIssues(IssueFilter { project_id: Some(3), .. })
        ));
        assert!(matches!(
            r.resolve("Which Bug tickets changed status?").await.unwrap(),
            TicketIntent::ListIssues(IssueFilter { tracker_id: Some(1), .. })
        ));
        assert!(matches!(
            r.resolve("List issues across my projects").await.unwrap(),
            TicketIntent::ListIssues(_)
        ));
    }

    #[tokio::test]
    async fn project_search_and_users_wording() {
        let r = resolver("{}");
        assert_eq!(
            r.resolve("Find projects about billing?").await.unwrap(),
            TicketIntent::SearchProjects("billing".into())
        );
        assert_eq!(
            r.resolve("Who are the team members?").await.unwrap(),
            TicketIntent::ListUsers
        );
        assert!(matches!(
            r.resolve("Show tickets assigned to users in Billing").await.unwrap(),
            TicketIntent::ListIssues(_)
        ));
    }

    #[tokio::test]
    async fn project_search_is_served_from_cache() {
        let metadata = metadata();
        let result = TicketIntent::SearchProjects("portal".into())
            .execute(None, &metadata)
            .await
            .unwrap();
        match result {
            RetrievalResult::Metadata(text) => {
                assert!(text.contains("Customer Portal"));
                assert!(!text.contains("Billing"));
            }
            other => panic!("unexpected result: {other:?}"),
        }

        let result = TicketIntent::SearchProjects("warehouse".into())
            .execute(None, &metadata)
            .await
            .unwrap();
        assert_eq!(
            result,
            RetrievalResult::Text("No cached projects match 'warehouse'.".into())
        );
    }

    #[test]
    fn users_listing_prefers_full_names() {
        let users = vec![
            User { id: 3, login: "jsmith".into(), firstname: "Jane".into(), lastname: "Smith".into(), mail: None },
            User { id: 4, login: "bot".into(), firstname: String::new(), lastname: String::new(), mail: None },
        ];
        let text = format_users(&users);
        assert!(text.starts_with("Users (2):"));
        assert!(text.contains("• Jane Smith (jsmith, ID: 3)"));
        assert!(text.contains("• bot (bot, ID: 4)"));
        assert_eq!(format_users(&[]), "No users available.");
    }

    #[tokio::test]
    async fn create_resolves_names_to_ids() {
        let intent = resolver(
            r#"{"project": "billing", "subject": "Invoice PDF blank", "priority": "urgent", "tracker": "Bug", "status": null}"#,
        )
        .resolve("Create a new issue in Billing: Invoice PDF blank, urgent")
        .await
        .unwrap();

        assert_eq!(
            intent,
            TicketIntent::CreateIssue(NewIssue {
                project_id: 2,
                subject: "Invoice PDF blank".into(),
                description: None,
                tracker_id: Some(1),
                priority_id: Some(4),
                status_id: None,
            })
        );
    }

    #[tokio::test]
    async fn create_without_project_asks_for_one() {
        let intent = resolver(r#"{"subject": "Something broke"}"#)
            .resolve("Create an issue: something broke")
            .await
            .unwrap();
        match intent {
            TicketIntent::Clarify(note) => {
                assert!(note.contains("which project"));
                assert!(note.contains("Customer Portal, Billing, Portal"));
            }
            other => panic!("unexpected intent: {other:?}"),
        }
    }

    #[tokio::test]
    async fn update_maps_status_and_falls_back_for_priority() {
        let intent = resolver(r#"{"status": "closed", "priority": "high", "notes": "fixed in 2.3"}"#)
            .resolve("Close issue #12 with high priority and note fixed in 2.3")
            .await
            .unwrap();

        match intent {
            TicketIntent::UpdateIssue { id, update, changes } => {
                assert_eq!(id, 12);
                assert_eq!(update.status_id, Some(5));
                assert_eq!(update.priority_id, Some(3));
                assert_eq!(update.notes.as_deref(), Some("fixed in 2.3"));
                assert_eq!(changes.len(), 3);
            }
            other => panic!("unexpected intent: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_status_and_empty_update_need_clarification() {
        let intent = resolver(r#"{"status": "Parked"}"#)
            .resolve("Set issue 9 to parked")
            .await
            .unwrap();
        assert!(matches!(intent, TicketIntent::Clarify(ref n) if n.contains("New, Closed")));

        let intent = resolver(r#"{"subject": null}"#)
            .resolve("Update #9")
            .await
            .unwrap();
        assert!(matches!(intent, TicketIntent::Clarify(ref n) if n.contains("#9")));

        let intent = resolver("not json at all")
            .resolve("Update #9 to closed")
            .await
            .unwrap();
        assert!(matches!(intent, TicketIntent::Clarify(_)));
    }

    #[tokio::test]
    async fn reference_comes_from_cache_without_api() {
        let metadata = metadata();
        let result = TicketIntent::Reference(Collection::Projects)
            .execute(None, &metadata)
            .await
            .unwrap();
        match result {
            RetrievalResult::Metadata(text) => assert!(text.contains("Customer Portal")),
            other => panic!("unexpected result: {other:?}"),
        }

        let result = TicketIntent::GetIssue(1).execute(None, &metadata).await.unwrap();
        assert_eq!(result, RetrievalResult::Text(NOT_CONFIGURED.to_string()));
    }
}
