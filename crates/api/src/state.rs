//! Application state for the API server.

use std::sync::Arc;
use std::time::Instant;

use ticketline_coordinator::{AppConfig, ChatPipeline};

/// Shared application state for the API server.
pub struct AppState {
    /// Router, data sources and conversation memory
    pub pipeline: Arc<ChatPipeline>,

    /// Server start time (for health checks)
    pub start_time: Instant,
}

impl AppState {
    pub fn new(pipeline: ChatPipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            start_time: Instant::now(),
        }
    }

    /// Build the whole pipeline from configuration.
    pub async fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        Ok(Self::new(ChatPipeline::from_config(config).await?))
    }

    /// Get the uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
