//! Rollcall entry point.
//!
//! Loads configuration, initializes tracing, connects the message source
//! (Discord, or a JSON fixture with `--fixture`), builds the router and
//! serves it until SIGINT/SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rollcall::config::{AppConfig, LoggingConfig, DEFAULT_CONFIG_PATH, DEFAULT_LOG_FILTER};
use rollcall::http::start_server;
use rollcall::routes::create_router;
use rollcall::source::{DiscordSource, MemorySource, MessageSource};
use rollcall::AppState;

/// Rollcall: who gets mentioned the most on a Discord server
#[derive(Parser, Debug)]
#[command(name = "rollcall", version, about)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Log level filter (e.g., "rollcall=debug,tower_http=info")
    #[arg(short, long)]
    log_level: Option<String>,

    /// Serve guilds from a JSON fixture instead of connecting to Discord
    #[arg(long)]
    fixture: Option<PathBuf>,
}

fn init_tracing(log_filter: &str, logging: &LoggingConfig) {
    let registry =
        tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::new(log_filter));

    if logging.is_json() {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = AppConfig::load(&args.config)?;

    // Priority: CLI > env > default
    let log_filter = args
        .log_level
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
    init_tracing(&log_filter, &config.logging);

    tracing::info!(config = %args.config, "Loaded configuration");

    let source: Arc<dyn MessageSource> = match &args.fixture {
        Some(path) => {
            tracing::info!(fixture = %path.display(), "Serving guilds from fixture");
            Arc::new(MemorySource::from_fixture_file(path)?)
        }
        None => {
            let discord = DiscordSource::new(&config.discord)?;
            if !config.discord.has_token() {
                tracing::warn!("No bot token configured; set DISCORD_TOKEN or [discord].token");
            } else if let Err(e) = discord.connect().await {
                tracing::error!(error = %e, "Failed to connect to Discord, will retry on /api/status");
            }
            Arc::new(discord)
        }
    };

    let state = AppState::new(config.clone(), source);
    let jobs = state.jobs.clone();
    let app = create_router(state);

    start_server(app, &config.http, jobs).await?;

    tracing::info!("Server stopped");
    Ok(())
}
