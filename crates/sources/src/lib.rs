//! Data sources behind the Ticketline router.
//!
//! - [`RedmineClient`]: live Redmine REST API behind the [`TicketApi`] trait.
//! - [`MetadataCache`]: read-mostly snapshot of projects, statuses,
//!   priorities and trackers, swapped atomically on refresh.
//! - [`TavilyClient`]: web search behind the [`WebSearch`] trait.

pub mod config;
pub mod metadata;
pub mod models;
pub mod redmine;
pub mod web_search;

pub use config::{MetadataConfig, RedmineConfig, WebSearchConfig};
pub use metadata::{format_entities, Collection, MetadataCache, MetadataSnapshot};
pub use models::{
    Entity, IdRef, Issue, IssueFilter, IssueUpdate, NamedRef, NewIssue, StatusFilter, TimeEntry,
    User,
};
pub use redmine::{rank_issues, RedmineClient, TicketApi};
pub use web_search::{TavilyClient, WebHit, WebSearch, WebSearchResponse};
