//! Query classification and the router built on top of it.
//!
//! The [`Router`] owns a [`QueryClassifier`] trait object. The production
//! classifier asks the LLM for a JSON verdict; [`KeywordClassifier`] is a
//! deterministic stand-in for offline use and tests. Whatever the classifier
//! does, the router always yields a [`RouteDecision`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use ticketline_common::{Result, TicketlineError, Turn};
use ticketline_llm::{ChatMessage, LlmClient, LlmRequest};
use tracing::{debug, info, warn};

use crate::routing::{RouteDecision, RouteTag};

const MAX_RATIONALE_LENGTH: usize = 500;

const ROUTING_SYSTEM_PROMPT: &str = r#"You are an expert at routing user questions about a Redmine instance to the appropriate datasource.

You have access to four datasources:

1. ticket_api: Use this for questions about:
   - Projects in Redmine (list projects, project details)
   - Issues (view, create, update, list issues)
   - Time entries (view time logs)
   - Metadata (statuses, priorities, trackers)
   - Any real-time Redmine data

2. semantic_search: Use this for:
   - Finding issues similar to a description or to another issue
   - Looking for past tickets about a topic when exact words may differ
   - Duplicate detection

3. external_search: Use this for:
   - General information not in Redmine
   - How-to guides or tutorials
   - External information, current events or news

4. direct_answer: Use this for:
   - Simple greetings or pleasantries
   - Questions about capabilities
   - Questions you can answer with general knowledge
   - Clarification questions

Examples:
- "Show me all projects" -> ticket_api
- "Find issues similar to login failures" -> semantic_search
- "How to set up CI/CD?" -> external_search
- "What is Redmine?" -> direct_answer
- "Hello" -> direct_answer

Respond with a single JSON object and nothing else:
{"datasource": "<ticket_api|semantic_search|external_search|direct_answer>", "reasoning": "<one sentence>"}"#;

/// Raw classifier verdict; the datasource is validated by the router.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Classification {
    pub datasource: String,
    #[serde(default)]
    pub reasoning: String,
}

#[async_trait]
pub trait QueryClassifier: Send + Sync {
    async fn classify(&self, text: &str, history: &[Turn]) -> Result<Classification>;
}

/// One chat-completion call returning `{"datasource", "reasoning"}`.
pub struct LlmClassifier {
    llm: Arc<dyn LlmClient>,
    history_turns: usize,
}

impl LlmClassifier {
    pub fn new(llm: Arc<dyn LlmClient>, history_turns: usize) -> Self {
        Self { llm, history_turns }
    }
}

#[async_trait]
impl QueryClassifier for LlmClassifier {
    async fn classify(&self, text: &str, history: &[Turn]) -> Result<Classification> {
        let start = history.len().saturating_sub(self.history_turns);
        let mut messages: Vec<ChatMessage> = history[start..].iter().map(ChatMessage::from).collect();
        messages.push(ChatMessage::user(text));

        let response = self
            .llm
            .complete(LlmRequest {
                system_prompt: Some(ROUTING_SYSTEM_PROMPT.to_string()),
                messages,
                temperature: Some(0.0),
                max_tokens: Some(200),
                json_output: true,
            })
            .await?;

        debug!(response = %response.content, "Classifier response");

        let json_str = extract_json_object(&response.content).ok_or_else(|| {
            TicketlineError::Llm(format!(
                "No JSON object in classifier response: {}",
                response.content.chars().take(200).collect::<String>()
            ))
        })?;
        serde_json::from_str(json_str)
            .map_err(|e| TicketlineError::Llm(format!("Invalid classifier JSON: {e}")))
    }
}

/// Deterministic keyword routing.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    fn route(text: &str) -> (RouteTag, &'static str) {
        let lower = text.to_lowercase();

        if lower.contains("similar")
            || lower.contains("related to")
            || lower.contains("duplicate")
            || lower.contains("like this")
        {
            return (RouteTag::SemanticSearch, "Detected similarity request");
        }

        if lower.contains("issue")
            || lower.contains("ticket")
            || lower.contains("bug")
            || lower.contains("project")
            || lower.contains("status")
            || lower.contains("priorit")
            || lower.contains("tracker")
            || lower.contains("time entr")
            || lower.contains("hours")
            || lower.contains("assign")
            || lower.contains('#')
        {
            return (RouteTag::TicketApi, "Detected Redmine data request");
        }

        if lower.contains("search the web")
            || lower.contains("how to")
            || lower.contains("how do i")
            || lower.contains("latest")
            || lower.contains("news")
            || lower.contains("tutorial")
        {
            return (RouteTag::ExternalSearch, "Detected external information request");
        }

        (RouteTag::DirectAnswer, "No data source needed")
    }
}

#[async_trait]
impl QueryClassifier for KeywordClassifier {
    async fn classify(&self, text: &str, _history: &[Turn]) -> Result<Classification> {
        let (tag, reasoning) = Self::route(text);
        Ok(Classification {
            datasource: tag.as_str().to_string(),
            reasoning: reasoning.to_string(),
        })
    }
}

/// Turns classifier output into a [`RouteDecision`], recovering from every
/// classifier failure by falling back to a direct answer.
pub struct Router {
    classifier: Arc<dyn QueryClassifier>,
}

impl Router {
    pub fn new(classifier: Arc<dyn QueryClassifier>) -> Self {
        Self { classifier }
    }

    pub async fn route(&self, message: &str, history: &[Turn]) -> Result<RouteDecision> {
        if message.trim().is_empty() {
            return Err(TicketlineError::InvalidRequest(
                "Message cannot be empty".into(),
            ));
        }

        let classification = match self.classifier.classify(message, history).await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Classification failed, falling back to direct answer");
                return Ok(RouteDecision::fallback(format!(
                    "Classifier unavailable: {e}"
                )));
            }
        };

        let tag = match classification.datasource.parse::<RouteTag>() {
            Ok(tag) => tag,
            Err(_) => {
                warn!(
                    datasource = %classification.datasource,
                    "Classifier returned an unknown datasource, falling back to direct answer"
                );
                return Ok(RouteDecision::fallback(format!(
                    "Unknown datasource '{}'",
                    classification.datasource
                )));
            }
        };

        let rationale = if classification.reasoning.chars().count() > MAX_RATIONALE_LENGTH {
            classification
                .reasoning
                .chars()
                .take(MAX_RATIONALE_LENGTH)
                .collect::<String>()
                + "..."
        } else {
            classification.reasoning
        };

        info!(route = %tag, rationale = %rationale, "Routed query");
        Ok(RouteDecision::new(tag, rationale))
    }
}

/// Extract the first balanced JSON object from model output that may carry
/// prose or code fences around it.
pub(crate) fn extract_json_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in s[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
