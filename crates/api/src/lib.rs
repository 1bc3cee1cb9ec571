//! HTTP gateway for Ticketline.
//!
//! # Endpoints
//!
//! - `GET /health` - Health check with component status
//! - `POST /api/v1/redmine/chat` - Send a message to the chat pipeline
//! - `POST /api/v1/redmine/validate` - Check Redmine credentials
//! - `GET /api/v1/redmine/capabilities` - What the assistant can do
//! - `GET /api/v1/sessions` - List conversation sessions
//! - `GET /api/v1/sessions/{id}` - Session details and history
//! - `DELETE /api/v1/sessions/{id}` - Forget a session
//! - `POST /api/v1/sessions/{id}/clear` - Drop a session's history, keep the session
//! - `GET /api/v1/metadata/{collection}` - Cached projects, statuses, priorities or trackers
//! - `POST /api/v1/metadata/refresh` - Re-fetch reference data
//! - `POST /api/v1/index/reload` - Re-read the issue similarity index
//!
//! # Architecture
//!
//! ```text
//! Client
//!    │
//!    ▼
//! ┌─────────────────┐
//! │   API Gateway   │ ◄── This crate
//! │     (Axum)      │
//! └────────┬────────┘
//!          ▼
//! ┌─────────────────┐
//! │  ChatPipeline   │ ── router ─► Redmine / index / web search ─► LLM
//! └─────────────────┘
//! ```

pub mod commands;
pub mod routes;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use ticketline_coordinator::ServerConfig;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use state::AppState;

/// Create the API router with all routes configured.
pub fn create_router(state: Arc<AppState>, server: &ServerConfig) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(routes::health))
        // Chat
        .route("/api/v1/redmine/chat", post(routes::chat))
        .route("/api/v1/redmine/validate", post(routes::validate))
        .route("/api/v1/redmine/capabilities", get(routes::capabilities))
        // Sessions
        .route("/api/v1/sessions", get(routes::list_sessions))
        .route(
            "/api/v1/sessions/{id}",
            get(routes::get_session).delete(routes::delete_session),
        )
        .route("/api/v1/sessions/{id}/clear", post(routes::clear_session))
        // Reference data
        .route("/api/v1/metadata/refresh", post(routes::refresh_metadata))
        .route("/api/v1/metadata/{collection}", get(routes::get_collection))
        .route("/api/v1/index/reload", post(routes::reload_index))
        // Middleware
        .layer(RequestBodyLimitLayer::new(server.body_limit_bytes))
        .layer(TimeoutLayer::new(Duration::from_millis(
            server.request_timeout_ms,
        )))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the API server on the configured address.
pub async fn serve(state: Arc<AppState>, server: &ServerConfig) -> anyhow::Result<()> {
    let router = create_router(state, server);

    let listener = tokio::net::TcpListener::bind((server.host.as_str(), server.port)).await?;
    let addr = listener.local_addr()?;
    info!(%addr, "Starting Ticketline API server");

    axum::serve(listener, router).await?;

    Ok(())
}
