//! HTTP route handlers for the API.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use ticketline_common::{TicketlineError, Turn};
use ticketline_coordinator::RouteTag;
use ticketline_memory::{IndexStats, SessionInfo};
use ticketline_sources::{Collection, Entity, User};
use tracing::{debug, error, info, warn};

use crate::AppState;

/// Longest accepted chat message, in characters.
pub const MAX_MESSAGE_CHARS: usize = 10_000;

/// Shown to clients whenever an upstream dependency is down.
pub const UNAVAILABLE_MESSAGE: &str = "service temporarily unavailable";

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

/// Failure of a handler, mapped onto an HTTP status.
#[derive(Debug)]
pub enum ApiError {
    Pipeline(TicketlineError),
    NotFound(String),
}

impl From<TicketlineError> for ApiError {
    fn from(err: TicketlineError) -> Self {
        Self::Pipeline(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::NotFound(what) => (
                StatusCode::NOT_FOUND,
                ErrorResponse {
                    error: what,
                    code: "NOT_FOUND",
                },
            ),
            Self::Pipeline(TicketlineError::UpstreamUnavailable(detail)) => {
                warn!(detail = %detail, "Upstream unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    ErrorResponse {
                        error: UNAVAILABLE_MESSAGE.into(),
                        code: "UPSTREAM_UNAVAILABLE",
                    },
                )
            }
            Self::Pipeline(TicketlineError::InvalidRequest(detail)) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error: detail,
                    code: "INVALID_REQUEST",
                },
            ),
            Self::Pipeline(other) => {
                error!(error = %other, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse {
                        error: "internal error".into(),
                        code: "INTERNAL_ERROR",
                    },
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub model: String,
    pub redmine_configured: bool,
    pub web_search_enabled: bool,
    pub index: IndexStats,
    pub metadata: HashMap<&'static str, usize>,
    pub active_sessions: usize,
}

/// Health check endpoint.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let pipeline = &state.pipeline;

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.uptime_seconds(),
        model: pipeline.model_name().to_string(),
        redmine_configured: pipeline.tickets().is_some(),
        web_search_enabled: pipeline.web_search_enabled(),
        index: pipeline.index().stats(),
        metadata: pipeline.metadata().counts(),
        active_sessions: pipeline.memory().session_count().await,
    })
}

/// Chat request body.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatMetadata {
    pub route: RouteTag,
    pub rationale: String,
    pub fallback: bool,
    pub history_len: usize,
}

/// Chat response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub message: String,
    pub session_id: String,
    pub metadata: ChatMetadata,
}

/// Answer one message within a session.
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let message = request.message.trim();
    if message.is_empty() {
        return Err(TicketlineError::InvalidRequest("Message cannot be empty".into()).into());
    }
    if message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(TicketlineError::InvalidRequest(format!(
            "Message is longer than {MAX_MESSAGE_CHARS} characters"
        ))
        .into());
    }

    info!(
        session_id = request.session_id.as_deref().unwrap_or("-"),
        content_preview = %message.chars().take(100).collect::<String>(),
        "Received chat message"
    );

    let outcome = state
        .pipeline
        .process(request.session_id.as_deref(), message)
        .await?;

    Ok(Json(ChatResponse {
        message: outcome.message,
        session_id: outcome.session_id,
        metadata: ChatMetadata {
            route: outcome.route,
            rationale: outcome.rationale,
            fallback: outcome.fallback,
            history_len: outcome.history_len,
        },
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ValidateResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

/// Check the configured Redmine credentials.
pub async fn validate(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ValidateResponse>, ApiError> {
    let api = state.pipeline.tickets().ok_or_else(|| {
        TicketlineError::InvalidRequest(
            "Redmine API not configured. Set REDMINE_API_BASE_URL and REDMINE_API_KEY".into(),
        )
    })?;

    match api.validate_connection().await {
        Ok(user) => {
            info!(login = %user.login, "Redmine credentials valid");
            Ok(Json(ValidateResponse {
                success: true,
                message: format!("Connected to Redmine as {}", user.display_name()),
                user: Some(user),
            }))
        }
        Err(e) => {
            warn!(error = %e, "Redmine validation failed");
            Ok(Json(ValidateResponse {
                success: false,
                message: format!("Failed to connect to Redmine: {e}"),
                user: None,
            }))
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CapabilitiesResponse {
    pub capabilities: &'static [&'static str],
    pub routes: Vec<&'static str>,
    pub example_queries: &'static [&'static str],
}

/// Static description of what the assistant can do.
pub async fn capabilities() -> Json<CapabilitiesResponse> {
    Json(CapabilitiesResponse {
        capabilities: &[
            "View all projects",
            "List issues (open, closed, or all)",
            "Get issue details by ID",
            "Create new issues",
            "Update existing issues",
            "Search issues by keywords",
            "Find issues similar to a description or another issue",
            "View time entries",
            "Get project metadata (statuses, priorities, trackers)",
            "Search projects by topic",
            "List Redmine users",
            "Search the web for external information",
        ],
        routes: RouteTag::ALL.iter().map(RouteTag::as_str).collect(),
        example_queries: &[
            "Show me all projects",
            "What are the open issues in Portal?",
            "Show details of issue #123",
            "Create a new bug in Billing: invoice totals are rounded wrong",
            "Update issue #45 status to Closed",
            "Find issues similar to login failures",
            "Show me time entries for project 3",
            "What statuses are available?",
            "Find projects about billing",
            "How do I configure CI/CD for a Rust project?",
        ],
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionListResponse {
    pub count: usize,
    pub sessions: Vec<SessionInfo>,
}

pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<SessionListResponse> {
    let sessions = state.pipeline.memory().list_sessions().await;
    Json(SessionListResponse {
        count: sessions.len(),
        sessions,
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    #[serde(flatten)]
    pub info: SessionInfo,
    pub summary: String,
    pub history: Vec<Turn>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    /// Only the most recent `limit` turns
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Session details with its retained turns.
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<SessionResponse>, ApiError> {
    debug!(session_id = %session_id, "Getting session");

    let memory = state.pipeline.memory();
    let info = memory
        .session_info(&session_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Session {session_id} not found")))?;

    Ok(Json(SessionResponse {
        info,
        summary: memory.summary(&session_id).await,
        history: match query.limit {
            Some(limit) => memory.recent(&session_id, limit).await,
            None => memory.history(&session_id).await,
        },
    }))
}

/// Forget a session's turns but keep the session itself.
pub async fn clear_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.pipeline.memory().clear(&session_id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Session {session_id} not found")))
    }
}

pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.pipeline.memory().delete(&session_id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Session {session_id} not found")))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CollectionResponse {
    pub collection: Collection,
    pub count: usize,
    pub items: Vec<Entity>,
}

/// Cached reference data for one collection.
pub async fn get_collection(
    State(state): State<Arc<AppState>>,
    Path(collection): Path<String>,
) -> Result<Json<CollectionResponse>, ApiError> {
    let collection: Collection = collection.parse()?;
    let items = state.pipeline.metadata().list_all(collection);

    Ok(Json(CollectionResponse {
        collection,
        count: items.len(),
        items,
    }))
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub refreshed: bool,
    pub counts: HashMap<&'static str, usize>,
}

/// Re-fetch reference data and swap it into the cache.
pub async fn refresh_metadata(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RefreshResponse>, ApiError> {
    state.pipeline.refresh_metadata().await?;
    let counts = state.pipeline.metadata().counts();
    info!(?counts, "Metadata refreshed");

    Ok(Json(RefreshResponse {
        refreshed: true,
        counts,
    }))
}

/// Re-read the issue index file written by `build-index`.
pub async fn reload_index(
    State(state): State<Arc<AppState>>,
) -> Result<Json<IndexStats>, ApiError> {
    Ok(Json(state.pipeline.reload_index().await?))
}
