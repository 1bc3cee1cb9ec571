//! Common types shared across Ticketline crates.
//!
//! This crate provides the error taxonomy, the retry policy used for every
//! upstream call, and the conversation turn type that flows between the
//! memory store, the router and the HTTP layer.

pub mod error;
pub mod message;
pub mod retry;

pub use error::{Result, TicketlineError};
pub use message::{new_session_id, Turn, TurnRole};
pub use retry::RetryConfig;
