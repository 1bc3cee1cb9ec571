//! Query routing and the chat pipeline for Ticketline.
//!
//! Every message is classified once, served by exactly one data source and
//! answered by the response model:
//!
//! ```text
//! User message
//!      │
//!      ▼
//! ┌─────────────────┐
//! │     Router      │  ◄── QueryClassifier (LLM or keyword)
//! └────────┬────────┘
//!          │ RouteTag
//!    ┌─────┴──────┬───────────────┬───────────────┐
//!    ▼            ▼               ▼               ▼
//! [ticket_api] [semantic_search] [external_search] [direct_answer]
//!  metadata     vector index      web search        -
//!  + Redmine    (+ keyword
//!               fallback)
//! ```

pub mod classifier;
pub mod config;
pub mod intent;
pub mod pipeline;
pub mod retrieval;
pub mod routing;

pub use classifier::{Classification, KeywordClassifier, LlmClassifier, QueryClassifier, Router};
pub use config::{AppConfig, ClassifierKind, RouterConfig, ServerConfig};
pub use intent::{IntentResolver, TicketIntent};
pub use pipeline::{ChatOutcome, ChatPipeline, ChatPipelineBuilder};
pub use retrieval::RetrievalResult;
pub use routing::{RouteDecision, RouteTag};
