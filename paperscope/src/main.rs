/*
paperscope - single-binary main.rs
This binary starts the Rocket HTTP server that serves the aggregated
journal feeds and the admin API.
*/

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use common::{Config, FileSourceStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use paperscope::aggregator;
use paperscope::server;

const DEFAULT_SOURCES_PATH: &str = "data/sources.json";

#[derive(Parser, Debug)]
#[command(name = "paperscope", about = "Paperscope journal feed aggregation server")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Fetch all feeds once at startup to warm the aggregation cache
    #[arg(long)]
    warm_cache: bool,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI args
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    // Resolve config paths
    let default_path = PathBuf::from("config.default.toml");

    let override_path = if let Some(p) = args.config {
        if !p.exists() {
            error!(path = ?p, "specified config file not found");
            return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
        }
        Some(p)
    } else {
        let p = PathBuf::from("config.toml");
        if p.exists() {
            Some(p)
        } else {
            None
        }
    };

    // Load configuration with defaults
    let config = match Config::load_with_defaults(
        if default_path.exists() {
            Some(&default_path)
        } else {
            None
        },
        override_path.as_deref(),
    )
    .await
    {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(%e, "failed to load configuration");
            return Err(e);
        }
    };
    info!(default = ?default_path, override_file = ?override_path, "configuration loaded");

    // Build the source registry store
    let sources_path = config
        .sources
        .as_ref()
        .and_then(|s| s.path.clone())
        .unwrap_or_else(|| DEFAULT_SOURCES_PATH.to_string());
    info!(sources_path = %sources_path, "using feed source registry");
    let store = Arc::new(FileSourceStore::new(&sources_path));

    let state = server::AppState::new(Arc::new(config), store);

    // Optionally run a full aggregation pass before serving so the first
    // request is a cache hit.
    if args.warm_cache {
        info!("Performing initial feed fetch...");
        let started = Utc::now();
        match aggregator::aggregate(
            &state.config,
            state.store.as_ref(),
            &state.cache,
            &state.refresh_guard,
        )
        .await
        {
            Ok(groups) => info!(
                "warm-up aggregation complete: {} journals in {}s",
                groups.len(),
                (Utc::now() - started).num_seconds()
            ),
            Err(e) => error!("warm-up aggregation failed: {:#}", e),
        }
    }

    // Launch the Rocket server (blocking until Rocket shuts down)
    info!("Launching Rocket HTTP server");
    if let Err(e) = server::launch_rocket(state).await {
        error!(%e, "Rocket server failed");
        return Err(e);
    }

    info!("Shutdown complete");
    Ok(())
}
