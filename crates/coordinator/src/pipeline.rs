//! The per-message chat pipeline.
//!
//! ```text
//! message ─► Router ─► one adapter ─► response LLM ─► memory
//!             │          ├─ ticket_api       (intent ─► metadata cache / Redmine)
//!             │          ├─ semantic_search  (vector index, keyword search fallback)
//!             │          ├─ external_search  (web search)
//!             │          └─ direct_answer    (nothing retrieved)
//! ```
//!
//! Memory is written only after the response exists, so a request that is
//! cancelled or fails leaves the session untouched.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use ticketline_common::{new_session_id, Result, TicketlineError, Turn};
use ticketline_llm::{build_llm_client, ChatMessage, LlmClient, LlmRequest};
use ticketline_memory::{
    build_embedder, ConversationStore, IndexFile, IndexStats, SimilarityOutcome, VectorIndex,
};
use ticketline_sources::{MetadataCache, RedmineClient, TavilyClient, TicketApi, WebSearch};
use tracing::{debug, info, warn};

use crate::classifier::{KeywordClassifier, LlmClassifier, QueryClassifier, Router};
use crate::config::{AppConfig, ClassifierKind};
use crate::intent::{issue_number, IntentResolver};
use crate::retrieval::RetrievalResult;
use crate::routing::{RouteDecision, RouteTag};

const DEFAULT_SIMILAR_K: usize = 5;
const DEFAULT_HISTORY_TURNS: usize = 6;
const METADATA_ISSUE_LIMIT: u32 = 100;

const RESPONSE_SYSTEM_PROMPT: &str = "You are an intelligent Redmine assistant.

You have access to:
- Redmine data: projects, issues, time entries, statuses, priorities and trackers
- Similar-issue search over past tickets
- Web search for external information
- Your own knowledge for simple and conversational questions

Current Redmine instance information:
{metadata}

Guidelines:
1. Use EXACT project names and IDs from the information above
2. Reference only statuses, priorities and trackers that exist in this instance
3. Base answers about Redmine data on the retrieved data below; never invent issues
4. When retrieved data says something is missing or needs clarification, ask the user for it
5. Be conversational, helpful and accurate; explain what you found";

/// Result of one chat turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatOutcome {
    pub message: String,
    pub session_id: String,
    pub route: RouteTag,
    pub rationale: String,
    pub fallback: bool,
    /// Turns retained in the session after this exchange
    pub history_len: usize,
}

pub struct ChatPipeline {
    router: Router,
    intents: IntentResolver,
    llm: Arc<dyn LlmClient>,
    memory: Arc<ConversationStore>,
    metadata: Arc<MetadataCache>,
    metadata_path: Option<PathBuf>,
    index: Arc<VectorIndex>,
    index_path: Option<PathBuf>,
    tickets: Option<Arc<dyn TicketApi>>,
    web: Option<Arc<dyn WebSearch>>,
    similar_k: usize,
}

impl ChatPipeline {
    pub fn builder(llm: Arc<dyn LlmClient>) -> ChatPipelineBuilder {
        ChatPipelineBuilder::new(llm)
    }

    /// Build every component described by `config`.
    ///
    /// Missing snapshot or index files degrade to an empty cache and an
    /// unavailable index; an unusable configuration is an error.
    pub async fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let llm = build_llm_client(&config.llm)?;

        let classifier: Arc<dyn QueryClassifier> = match config.router.classifier {
            ClassifierKind::Llm => Arc::new(LlmClassifier::new(
                llm.clone(),
                config.router.history_turns,
            )),
            ClassifierKind::Keyword => Arc::new(KeywordClassifier),
        };

        let metadata = MetadataCache::load(&config.metadata.path).await?;

        let tickets = RedmineClient::from_config(&config.redmine, config.retry.clone())?
            .map(|client| Arc::new(client) as Arc<dyn TicketApi>);
        if tickets.is_none() {
            warn!("Redmine base URL or API key not set; live ticket data disabled");
        }

        let web = TavilyClient::from_config(&config.web_search, config.retry.clone())?
            .map(|client| Arc::new(client) as Arc<dyn WebSearch>);

        let index = match &config.vector.path {
            Some(path) => {
                let embedder = build_embedder(&config.vector, config.retry.clone())?;
                match VectorIndex::load(path, embedder.clone()).await {
                    Ok(index) => index,
                    Err(e) => {
                        warn!(error = %e, path = %path.display(), "Failed to load issue index; semantic search disabled");
                        VectorIndex::empty(embedder)
                    }
                }
            }
            None => VectorIndex::unavailable(),
        };

        let mut builder = ChatPipelineBuilder::new(llm)
            .classifier(classifier)
            .memory(Arc::new(ConversationStore::new(config.memory.max_turns)))
            .metadata(Arc::new(metadata))
            .metadata_path(config.metadata.path.clone())
            .index(Arc::new(index))
            .similar_k(config.vector.default_k);
        if let Some(path) = &config.vector.path {
            builder = builder.index_path(path.clone());
        }
        if let Some(tickets) = tickets {
            builder = builder.tickets(tickets);
        }
        if let Some(web) = web {
            builder = builder.web_search(web);
        }

        let pipeline = builder.build();
        info!(
            model = %pipeline.llm.model_name(),
            classifier = ?config.router.classifier,
            redmine = pipeline.tickets.is_some(),
            web_search = pipeline.web.is_some(),
            index = pipeline.index.is_available(),
            "Chat pipeline ready"
        );
        Ok(pipeline)
    }

    /// Route, retrieve, answer, then record the exchange.
    ///
    /// A missing or blank `session_id` starts a new session.
    pub async fn process(&self, session_id: Option<&str>, message: &str) -> Result<ChatOutcome> {
        let message = message.trim();
        let session_id = session_id
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(new_session_id);

        let history = self.memory.history(&session_id).await;
        let decision = self.router.route(message, &history).await?;
        let retrieval = self.retrieve(&decision, message).await?;

        debug!(
            session_id = %session_id,
            route = %decision.tag,
            retrieved = retrieval.kind(),
            "Retrieval complete"
        );

        let answer = self.respond(message, &history, &retrieval).await?;

        let history_len = self
            .memory
            .append_exchange(&session_id, Turn::user(message), Turn::assistant(answer.clone()))
            .await;

        info!(
            session_id = %session_id,
            route = %decision.tag,
            fallback = decision.fallback,
            history_len,
            "Chat turn complete"
        );

        Ok(ChatOutcome {
            message: answer,
            session_id,
            route: decision.tag,
            rationale: decision.rationale,
            fallback: decision.fallback,
            history_len,
        })
    }

    async fn retrieve(&self, decision: &RouteDecision, message: &str) -> Result<RetrievalResult> {
        match decision.tag {
            RouteTag::TicketApi => {
                let intent = self.intents.resolve(message).await?;
                intent
                    .execute(self.tickets.as_deref(), &self.metadata)
                    .await
            }
            RouteTag::SemanticSearch => self.similar_issues(message).await,
            RouteTag::ExternalSearch => match &self.web {
                Some(web) => {
                    let response = web.search(message).await?;
                    Ok(RetrievalResult::WebResults {
                        answer: response.answer,
                        hits: response.hits,
                    })
                }
                None => Ok(RetrievalResult::Text(
                    "Web search is not configured; answer from general knowledge and say so."
                        .into(),
                )),
            },
            RouteTag::DirectAnswer => Ok(RetrievalResult::Nothing),
        }
    }

    /// Vector search, or live keyword search when the index is unavailable.
    async fn similar_issues(&self, message: &str) -> Result<RetrievalResult> {
        let outcome = match issue_number(message) {
            Some(id) => self.index.similar_to_issue(id, self.similar_k),
            None => self.index.similarity_search(message, self.similar_k).await,
        };

        match outcome {
            SimilarityOutcome::Matches(records) => Ok(RetrievalResult::Similar(records)),
            SimilarityOutcome::Unavailable => {
                warn!("Similarity index unavailable, falling back to keyword search");
                match &self.tickets {
                    Some(api) => Ok(RetrievalResult::Tickets(
                        api.search_issues(message, self.similar_k).await?,
                    )),
                    None => Ok(RetrievalResult::Text(
                        "Similar-issue search is unavailable right now.".into(),
                    )),
                }
            }
        }
    }

    async fn respond(
        &self,
        message: &str,
        history: &[Turn],
        retrieval: &RetrievalResult,
    ) -> Result<String> {
        let mut system_prompt =
            RESPONSE_SYSTEM_PROMPT.replace("{metadata}", &self.metadata.summary());
        let context = self.metadata.context_for_query(message);
        if !context.is_empty() {
            system_prompt.push_str("\n\nReference data relevant to this question:\n");
            system_prompt.push_str(&context);
        }
        if !retrieval.is_empty() {
            system_prompt.push_str("\n\nRetrieved data:\n");
            system_prompt.push_str(&retrieval.render());
        }

        let mut messages: Vec<ChatMessage> = history.iter().map(ChatMessage::from).collect();
        messages.push(ChatMessage::user(message));

        let response = self
            .llm
            .complete(LlmRequest {
                system_prompt: Some(system_prompt),
                messages,
                ..Default::default()
            })
            .await?;
        Ok(response.content)
    }

    /// Re-fetch reference data from Redmine, or re-read the snapshot file
    /// when no live API is configured.
    pub async fn refresh_metadata(&self) -> Result<()> {
        match (&self.tickets, &self.metadata_path) {
            (Some(api), _) => {
                self.metadata
                    .refresh_from_api(api.as_ref(), METADATA_ISSUE_LIMIT)
                    .await
            }
            (None, Some(path)) => self.metadata.reload_from_file(path).await,
            (None, None) => Err(TicketlineError::Config(
                "No Redmine API or metadata file to refresh from".into(),
            )),
        }
    }

    /// Re-read the index file and swap it in; searches already running
    /// finish against the previous one.
    pub async fn reload_index(&self) -> Result<IndexStats> {
        let path = self.index_path.as_ref().ok_or_else(|| {
            TicketlineError::InvalidRequest("No issue index path configured; set [vector].path".into())
        })?;
        let file = IndexFile::load(path).await?;
        info!(path = %path.display(), records = file.records.len(), "Reloaded issue index");
        self.index.swap(file);
        Ok(self.index.stats())
    }

    pub fn memory(&self) -> &Arc<ConversationStore> {
        &self.memory
    }

    pub fn metadata(&self) -> &Arc<MetadataCache> {
        &self.metadata
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    pub fn tickets(&self) -> Option<&Arc<dyn TicketApi>> {
        self.tickets.as_ref()
    }

    pub fn web_search_enabled(&self) -> bool {
        self.web.is_some()
    }

    pub fn model_name(&self) -> &str {
        self.llm.model_name()
    }
}

/// Assembles a [`ChatPipeline`]; unset parts get inert defaults.
pub struct ChatPipelineBuilder {
    llm: Arc<dyn LlmClient>,
    classifier: Option<Arc<dyn QueryClassifier>>,
    memory: Option<Arc<ConversationStore>>,
    metadata: Option<Arc<MetadataCache>>,
    metadata_path: Option<PathBuf>,
    index: Option<Arc<VectorIndex>>,
    index_path: Option<PathBuf>,
    tickets: Option<Arc<dyn TicketApi>>,
    web: Option<Arc<dyn WebSearch>>,
    similar_k: usize,
}

impl ChatPipelineBuilder {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            classifier: None,
            memory: None,
            metadata: None,
            metadata_path: None,
            index: None,
            index_path: None,
            tickets: None,
            web: None,
            similar_k: DEFAULT_SIMILAR_K,
        }
    }

    pub fn classifier(mut self, classifier: Arc<dyn QueryClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn memory(mut self, memory: Arc<ConversationStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn metadata(mut self, metadata: Arc<MetadataCache>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn metadata_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.metadata_path = Some(path.into());
        self
    }

    pub fn index(mut self, index: Arc<VectorIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn index_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.index_path = Some(path.into());
        self
    }

    pub fn tickets(mut self, tickets: Arc<dyn TicketApi>) -> Self {
        self.tickets = Some(tickets);
        self
    }

    pub fn web_search(mut self, web: Arc<dyn WebSearch>) -> Self {
        self.web = Some(web);
        self
    }

    pub fn similar_k(mut self, k: usize) -> Self {
        self.similar_k = k.max(1);
        self
    }

    pub fn build(self) -> ChatPipeline {
        let metadata = self
            .metadata
            .unwrap_or_else(|| Arc::new(MetadataCache::empty()));
        let classifier = self.classifier.unwrap_or_else(|| {
            Arc::new(LlmClassifier::new(self.llm.clone(), DEFAULT_HISTORY_TURNS))
        });

        ChatPipeline {
            router: Router::new(classifier),
            intents: IntentResolver::new(self.llm.clone(), metadata.clone()),
            llm: self.llm,
            memory: self
                .memory
                .unwrap_or_else(|| Arc::new(ConversationStore::new(20))),
            metadata,
            metadata_path: self.metadata_path,
            index: self
                .index
                .unwrap_or_else(|| Arc::new(VectorIndex::unavailable())),
            index_path: self.index_path,
            tickets: self.tickets,
            web: self.web,
            similar_k: self.similar_k,
        }
    }
}
