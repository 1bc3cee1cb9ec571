//! Route tags and routing decisions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ticketline_common::TicketlineError;

/// Data source chosen for a user message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteTag {
    /// Live Redmine data or the cached reference data
    TicketApi,
    /// Similarity search over indexed issues
    SemanticSearch,
    /// The model answers from its own knowledge
    DirectAnswer,
    /// Web search for information outside Redmine
    ExternalSearch,
}

impl RouteTag {
    pub const ALL: [RouteTag; 4] = [
        RouteTag::TicketApi,
        RouteTag::SemanticSearch,
        RouteTag::DirectAnswer,
        RouteTag::ExternalSearch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TicketApi => "ticket_api",
            Self::SemanticSearch => "semantic_search",
            Self::DirectAnswer => "direct_answer",
            Self::ExternalSearch => "external_search",
        }
    }
}

impl fmt::Display for RouteTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RouteTag {
    type Err = TicketlineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "ticket_api" | "redmine_tools" | "redmine" => Ok(Self::TicketApi),
            "semantic_search" | "vector_search" => Ok(Self::SemanticSearch),
            "direct_answer" | "direct" => Ok(Self::DirectAnswer),
            "external_search" | "web_search" => Ok(Self::ExternalSearch),
            other => Err(TicketlineError::InvalidRequest(format!(
                "Unknown route tag: {other}"
            ))),
        }
    }
}

/// The outcome of routing one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub tag: RouteTag,

    /// Why this source was chosen
    pub rationale: String,

    /// Set when the classifier failed and the router substituted a default
    #[serde(default)]
    pub fallback: bool,
}

impl RouteDecision {
    pub fn new(tag: RouteTag, rationale: impl Into<String>) -> Self {
        Self {
            tag,
            rationale: rationale.into(),
            fallback: false,
        }
    }

    pub fn fallback(rationale: impl Into<String>) -> Self {
        Self {
            tag: RouteTag::DirectAnswer,
            rationale: rationale.into(),
            fallback: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_tags_and_aliases() {
        for tag in RouteTag::ALL {
            assert_eq!(tag.as_str().parse::<RouteTag>().unwrap(), tag);
        }
        assert_eq!("redmine_tools".parse::<RouteTag>().unwrap(), RouteTag::TicketApi);
        assert_eq!("Web Search".parse::<RouteTag>().unwrap(), RouteTag::ExternalSearch);
        assert!("spreadsheet".parse::<RouteTag>().is_err());
    }

    #[test]
    fn serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&RouteTag::SemanticSearch).unwrap(),
            "\"semantic_search\""
        );
    }

    #[test]
    fn fallback_is_direct_answer() {
        let decision = RouteDecision::fallback("classifier down");
        assert_eq!(decision.tag, RouteTag::DirectAnswer);
        assert!(decision.fallback);
        assert!(!RouteDecision::new(RouteTag::TicketApi, "x").fallback);
    }
}
