//! Ticketline API server binary.
//!
//! Usage:
//!   ticketline-api --config config.toml
//!   ticketline-api serve --port 8080 --host 127.0.0.1
//!   ticketline-api fetch-metadata --issue-limit 500
//!   ticketline-api build-index --output data/issue_index.json
//!
//! # Environment Variables
//!
//! - `GROQ_API_KEY` / `OPENAI_API_KEY` - LLM provider key
//! - `REDMINE_API_BASE_URL`, `REDMINE_API_KEY` - Redmine instance
//! - `TAVILY_API_KEY` - Web search
//! - `EMBEDDING_API_KEY` - Embeddings for the issue index
//! - `RUST_LOG` - Log filter

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use ticketline_api::{commands, serve, AppState};
use ticketline_coordinator::AppConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ticketline-api")]
#[command(about = "Ticketline - adaptive retrieval chat for Redmine", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to config.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Defaults to `serve`
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server
    Serve {
        /// Bind address (overrides [server].host)
        #[arg(short = 'b', long)]
        host: Option<String>,

        /// Port to listen on (overrides [server].port)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Snapshot Redmine reference data and issues to a JSON file
    FetchMetadata {
        /// Output file (defaults to [metadata].path)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Maximum issues captured in the snapshot
        #[arg(long, default_value_t = 100)]
        issue_limit: u32,
    },

    /// Embed the snapshot's issues into the similarity index file
    BuildIndex {
        /// Snapshot to read (defaults to [metadata].path)
        #[arg(short, long)]
        snapshot: Option<PathBuf>,

        /// Index file to write (defaults to [vector].path)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Documents per embedding request
        #[arg(long, default_value_t = 32)]
        batch_size: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,ticketline_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match &cli.config {
        Some(path) => tracing::info!(path = %path.display(), "Loading configuration"),
        None => tracing::info!("Using default configuration"),
    }
    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Serve {
        host: None,
        port: None,
    }) {
        Commands::Serve { host, port } => run_server(config, host, port).await,
        Commands::FetchMetadata {
            output,
            issue_limit,
        } => {
            let output = output.unwrap_or_else(|| config.metadata.path.clone());
            commands::fetch_metadata(&config, &output, issue_limit).await?;
            Ok(())
        }
        Commands::BuildIndex {
            snapshot,
            output,
            batch_size,
        } => {
            let snapshot = snapshot.unwrap_or_else(|| config.metadata.path.clone());
            let output = output
                .or_else(|| config.vector.path.clone())
                .context("No index path; pass --output or set [vector].path")?;
            let file = commands::build_index(&config, &snapshot, &output, batch_size).await?;
            tracing::info!(
                records = file.records.len(),
                dimension = file.dimension,
                model = %file.model,
                "Issue index built"
            );
            Ok(())
        }
    }
}

async fn run_server(
    mut config: AppConfig,
    host: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    if config.server.host == "0.0.0.0" {
        tracing::warn!(
            "Server binding to 0.0.0.0; the API is reachable on all network interfaces \
             and has no authentication of its own."
        );
    }

    let state = Arc::new(AppState::from_config(&config).await?);

    let _eviction = commands::spawn_session_eviction(
        state.pipeline.memory().clone(),
        config.memory.session_idle_secs,
        config.memory.eviction_interval_secs,
    );

    serve(state, &config.server).await
}
