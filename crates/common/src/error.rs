//! Error types for Ticketline.
//!
//! Only [`TicketlineError::UpstreamUnavailable`] and
//! [`TicketlineError::InvalidRequest`] are meant to cross the HTTP boundary
//! with their detail; everything else is reported as an internal failure.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TicketlineError {
    /// Network failure, timeout, 429 or 5xx from an upstream service.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Bad parameters or a 4xx answer from an upstream service.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TicketlineError {
    /// Whether a retry has a chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable(_))
    }

    /// Classify a non-success HTTP status from an upstream service.
    pub fn from_status(service: &str, status: u16, detail: &str) -> Self {
        match status {
            429 | 500..=599 => {
                Self::UpstreamUnavailable(format!("{service} returned {status}: {detail}"))
            }
            _ => Self::InvalidRequest(format!("{service} rejected the request ({status}): {detail}")),
        }
    }

    /// Classify a transport-level failure (connect error, timeout, broken body).
    pub fn transport(service: &str, err: impl std::fmt::Display) -> Self {
        Self::UpstreamUnavailable(format!("{service} request failed: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, TicketlineError>;
