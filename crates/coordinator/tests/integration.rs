//! End-to-end tests for the chat pipeline.
//!
//! The LLM, classifier, ticket API and embedder are in-process fakes, so the
//! tests are deterministic and need no network.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use ticketline_common::{Result, TicketlineError, Turn};
use ticketline_coordinator::{
    ChatPipeline, Classification, KeywordClassifier, QueryClassifier, RouteTag,
};
use ticketline_llm::{LlmClient, LlmRequest, LlmResponse};
use ticketline_memory::{ConversationStore, Embedder, IndexBuilder, IndexDocument, VectorIndex};
use ticketline_sources::{
    Entity, Issue, IssueFilter, IssueUpdate, MetadataCache, MetadataSnapshot, NewIssue,
    TicketApi, TimeEntry, User,
};

/// Answers field extraction with a fixed JSON object and echoes the system
/// prompt for everything else, so assertions can see the retrieved data.
struct ScriptedLlm {
    fields: &'static str,
    response_calls: AtomicUsize,
}

impl ScriptedLlm {
    fn new(fields: &'static str) -> Arc<Self> {
        Arc::new(Self {
            fields,
            response_calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let content = if request.json_output {
            self.fields.to_string()
        } else {
            self.response_calls.fetch_add(1, Ordering::SeqCst);
            request.system_prompt.unwrap_or_default()
        };
        Ok(LlmResponse {
            content,
            model: "scripted".into(),
            usage: None,
            finish_reason: Some("stop".into()),
        })
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

struct FixedClassifier(&'static str);

#[async_trait]
impl QueryClassifier for FixedClassifier {
    async fn classify(&self, _text: &str, _history: &[Turn]) -> Result<Classification> {
        Ok(Classification {
            datasource: self.0.to_string(),
            reasoning: "fixed".into(),
        })
    }
}

struct BrokenClassifier;

#[async_trait]
impl QueryClassifier for BrokenClassifier {
    async fn classify(&self, _text: &str, _history: &[Turn]) -> Result<Classification> {
        Err(TicketlineError::Llm("model returned garbage".into()))
    }
}

#[derive(Default)]
struct FakeTickets {
    unavailable: bool,
    list_calls: AtomicUsize,
    created: parking_lot::Mutex<Vec<NewIssue>>,
}

fn issue(id: u64, subject: &str, project: &str) -> Issue {
    serde_json::from_value(json!({
        "id": id,
        "subject": subject,
        "description": format!("{subject}. Reported by support."),
        "project": {"id": 1, "name": project},
        "status": {"id": 1, "name": "New"},
        "priority": {"id": 2, "name": "Normal"},
        "tracker": {"id": 1, "name": "Bug"}
    }))
    .unwrap()
}

fn all_issues() -> Vec<Issue> {
    vec![
        issue(1, "Login fails for SSO users", "Portal"),
        issue(2, "Invoice rounding error", "Billing"),
        issue(3, "Login failures after password reset", "Portal"),
        issue(4, "Export to CSV times out", "Reports"),
    ]
}

impl FakeTickets {
    fn check(&self) -> Result<()> {
        if self.unavailable {
            Err(TicketlineError::UpstreamUnavailable(
                "redmine request failed: operation timed out".into(),
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TicketApi for FakeTickets {
    fn base_url(&self) -> &str {
        "http://redmine.test"
    }

    async fn validate_connection(&self) -> Result<User> {
        self.check()?;
        Ok(serde_json::from_value(json!({"id": 1, "login": "admin"})).unwrap())
    }

    async fn list_projects(&self) -> Result<Vec<Entity>> {
        self.check()?;
        Ok(vec![Entity::new(1, "Portal")])
    }

    async fn list_issues(&self, _filter: &IssueFilter) -> Result<Vec<Issue>> {
        self.check()?;
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(all_issues())
    }

    async fn get_issue(&self, id: u64) -> Result<Option<Issue>> {
        self.check()?;
        Ok(all_issues().into_iter().find(|i| i.id == id))
    }

    async fn create_issue(&self, new_issue: &NewIssue) -> Result<Issue> {
        self.check()?;
        self.created.lock().push(new_issue.clone());
        Ok(issue(100, &new_issue.subject, "Billing"))
    }

    async fn update_issue(&self, _id: u64, _update: &IssueUpdate) -> Result<()> {
        self.check()
    }

    async fn list_time_entries(
        &self,
        _project_id: Option<u64>,
        _limit: Option<u32>,
    ) -> Result<Vec<TimeEntry>> {
        self.check()?;
        Ok(Vec::new())
    }

    async fn list_statuses(&self) -> Result<Vec<Entity>> {
        Ok(Vec::new())
    }

    async fn list_priorities(&self) -> Result<Vec<Entity>> {
        Ok(Vec::new())
    }

    async fn list_trackers(&self) -> Result<Vec<Entity>> {
        Ok(Vec::new())
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        Ok(Vec::new())
    }
}

/// Three-dimensional "topic" embedding: login, billing, export.
struct TopicEmbedder;

#[async_trait]
impl Embedder for TopicEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let t = t.to_lowercase();
                let has = |w: &str| if t.contains(w) { 1.0 } else { 0.01 };
                vec![has("login"), has("invoice"), has("export")]
            })
            .collect())
    }

    fn model_name(&self) -> &str {
        "topic"
    }
}

const PROJECT_NAMES: [&str; 5] = ["Portal", "Billing", "Reports", "Mobile App", "Infrastructure"];

fn metadata() -> Arc<MetadataCache> {
    let projects = PROJECT_NAMES
        .iter()
        .enumerate()
        .map(|(i, name)| Entity::new(i as u64 + 1, *name))
        .collect();
    Arc::new(MetadataCache::new(
        MetadataSnapshot::from_collections(
            projects,
            vec![Entity::new(1, "New"), Entity::new(5, "Closed")],
            vec![Entity::new(2, "Normal"), Entity::new(4, "Urgent")],
            vec![Entity::new(1, "Bug")],
        )
        .with_source("http://redmine.test", "2024-06-01T00:00:00Z"),
    ))
}

#[tokio::test]
async fn projects_question_is_answered_from_the_metadata_cache() {
    let tickets = Arc::new(FakeTickets::default());
    let pipeline = ChatPipeline::builder(ScriptedLlm::new("{}"))
        .classifier(Arc::new(FixedClassifier("ticket_api")))
        .metadata(metadata())
        .tickets(tickets.clone())
        .build();

    let outcome = pipeline
        .process(Some("s1"), "What projects do I have?")
        .await
        .unwrap();

    assert_eq!(outcome.route, RouteTag::TicketApi);
    assert!(!outcome.fallback);
    for name in PROJECT_NAMES {
        assert!(outcome.message.contains(name), "missing {name}");
    }
    assert_eq!(outcome.history_len, 2);
    assert_eq!(pipeline.memory().history("s1").await.len(), 2);
    assert_eq!(tickets.list_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn similar_issues_fall_back_to_keyword_search_without_index() {
    let tickets = Arc::new(FakeTickets::default());
    let pipeline = ChatPipeline::builder(ScriptedLlm::new("{}"))
        .classifier(Arc::new(KeywordClassifier))
        .metadata(metadata())
        .tickets(tickets.clone())
        .build();

    let outcome = pipeline
        .process(Some("s1"), "Find issues similar to login failures")
        .await
        .unwrap();

    assert_eq!(outcome.route, RouteTag::SemanticSearch);
    assert_eq!(tickets.list_calls.load(Ordering::SeqCst), 1);
    let first = outcome.message.find("#3: Login failures").unwrap();
    let second = outcome.message.find("#1: Login fails").unwrap();
    assert!(first < second);
    assert!(!outcome.message.contains("Invoice rounding"));
}

#[tokio::test]
async fn similar_issues_use_the_vector_index_when_loaded() {
    let embedder: Arc<dyn Embedder> = Arc::new(TopicEmbedder);
    let documents = all_issues()
        .iter()
        .filter_map(|i| IndexDocument::from_issue_json(&serde_json::to_value(i).unwrap()))
        .collect();
    let file = IndexBuilder::new(embedder.clone())
        .build(documents)
        .await
        .unwrap();
    let tickets = Arc::new(FakeTickets::default());

    let pipeline = ChatPipeline::builder(ScriptedLlm::new("{}"))
        .classifier(Arc::new(FixedClassifier("semantic_search")))
        .index(Arc::new(VectorIndex::new(embedder, file)))
        .tickets(tickets.clone())
        .similar_k(2)
        .build();

    let outcome = pipeline
        .process(None, "Anything like the login problems?")
        .await
        .unwrap();
    assert!(outcome.message.contains("Found 2 similar issue(s)"));
    assert!(outcome.message.contains("Login fails for SSO users"));
    assert!(outcome.message.contains("Login failures after password reset"));
    assert_eq!(tickets.list_calls.load(Ordering::SeqCst), 0);

    let outcome = pipeline
        .process(None, "Which issues are similar to #2?")
        .await
        .unwrap();
    assert!(!outcome.message.contains("#2: Invoice rounding error"));
}

#[tokio::test]
async fn history_stays_bounded_at_twenty_turns() {
    let pipeline = ChatPipeline::builder(ScriptedLlm::new("{}"))
        .classifier(Arc::new(FixedClassifier("direct_answer")))
        .memory(Arc::new(ConversationStore::new(20)))
        .build();

    for i in 0..10 {
        let outcome = pipeline
            .process(Some("bounded"), &format!("message {i}"))
            .await
            .unwrap();
        assert_eq!(outcome.history_len, (i + 1) * 2);
    }

    let outcome = pipeline
        .process(Some("bounded"), "message 10")
        .await
        .unwrap();
    assert_eq!(outcome.history_len, 20);

    let history = pipeline.memory().history("bounded").await;
    assert_eq!(history.len(), 20);
    assert_eq!(history[0].content, "message 1");
    assert_eq!(history[18].content, "message 10");
}

#[tokio::test]
async fn upstream_failure_surfaces_and_leaves_memory_untouched() {
    let tickets = Arc::new(FakeTickets {
        unavailable: true,
        ..Default::default()
    });
    let llm = ScriptedLlm::new("{}");
    let pipeline = ChatPipeline::builder(llm.clone())
        .classifier(Arc::new(FixedClassifier("ticket_api")))
        .metadata(metadata())
        .tickets(tickets)
        .build();

    let err = pipeline
        .process(Some("s1"), "Show me open issues in Portal")
        .await
        .unwrap_err();

    assert!(matches!(err, TicketlineError::UpstreamUnavailable(_)));
    assert!(pipeline.memory().history("s1").await.is_empty());
    assert_eq!(llm.response_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn classifier_failure_degrades_to_direct_answer() {
    let pipeline = ChatPipeline::builder(ScriptedLlm::new("{}"))
        .classifier(Arc::new(BrokenClassifier))
        .build();

    let outcome = pipeline.process(Some("s1"), "Hello!").await.unwrap();
    assert_eq!(outcome.route, RouteTag::DirectAnswer);
    assert!(outcome.fallback);
    assert_eq!(outcome.history_len, 2);
}

#[tokio::test]
async fn create_request_resolves_names_before_calling_the_api() {
    let tickets = Arc::new(FakeTickets::default());
    let pipeline = ChatPipeline::builder(ScriptedLlm::new(
        r#"{"project": "Billing", "subject": "Invoice PDF is blank", "priority": "Urgent"}"#,
    ))
    .classifier(Arc::new(FixedClassifier("ticket_api")))
    .metadata(metadata())
    .tickets(tickets.clone())
    .build();

    let outcome = pipeline
        .process(
            Some("s1"),
            "Create a new issue in Billing: Invoice PDF is blank, urgent",
        )
        .await
        .unwrap();

    assert!(outcome.message.contains("Created issue #100"));
    let created = tickets.created.lock().clone();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].project_id, 2);
    assert_eq!(created[0].priority_id, Some(4));
}

#[tokio::test]
async fn sessions_are_isolated() {
    let pipeline = ChatPipeline::builder(ScriptedLlm::new("{}"))
        .classifier(Arc::new(FixedClassifier("direct_answer")))
        .build();

    pipeline.process(Some("a"), "hi from a").await.unwrap();
    pipeline.process(Some("a"), "again from a").await.unwrap();
    pipeline.process(Some("b"), "hi from b").await.unwrap();

    assert_eq!(pipeline.memory().history("a").await.len(), 4);
    let b = pipeline.memory().history("b").await;
    assert_eq!(b.len(), 2);
    assert_eq!(b[0].content, "hi from b");
}
