//! jockey-qd - Main entry point
//!
//! Headless queue daemon for a Discord music frontend. Owns per-guild
//! track queues and playback state, delegates media resolution and
//! audio delivery to sidecar services, and exposes the whole command
//! surface over HTTP with an SSE event feed.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jockey_common::EventBus;
use jockey_qd::api::{self, AppContext};
use jockey_qd::blacklist::Blacklist;
use jockey_qd::config::{Config, Overrides};
use jockey_qd::engine::PlaybackEngine;
use jockey_qd::registry::{spawn_idle_sweeper, SessionRegistry};
use jockey_qd::resolver::HttpResolver;
use jockey_qd::stats::BotStats;
use jockey_qd::transport::HttpVoiceGateway;

/// Command-line arguments for jockey-qd
#[derive(Parser, Debug)]
#[command(name = "jockey-qd")]
#[command(about = "Per-guild music queue daemon")]
#[command(version)]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long, env = "JOCKEY_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "JOCKEY_PORT")]
    port: Option<u16>,

    /// Directory for persistent state
    #[arg(short, long, env = "JOCKEY_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Base URL of the media resolver sidecar
    #[arg(long, env = "JOCKEY_RESOLVER_URL")]
    resolver_url: Option<String>,

    /// Base URL of the voice gateway sidecar
    #[arg(long, env = "JOCKEY_GATEWAY_URL")]
    gateway_url: Option<String>,

    /// Ceiling in seconds on one resolution round-trip
    #[arg(long, env = "JOCKEY_RESOLUTION_TIMEOUT")]
    resolution_timeout_secs: Option<u64>,

    /// Seconds before an untouched idle session is evicted
    #[arg(long, env = "JOCKEY_IDLE_SESSION_TIMEOUT")]
    idle_session_timeout_secs: Option<u64>,
}

impl Args {
    fn into_overrides(self) -> Overrides {
        Overrides {
            config_file: self.config,
            port: self.port,
            data_dir: self.data_dir,
            resolver_url: self.resolver_url,
            gateway_url: self.gateway_url,
            resolution_timeout_secs: self.resolution_timeout_secs,
            idle_session_timeout_secs: self.idle_session_timeout_secs,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jockey_qd=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = Config::resolve(&args.into_overrides()).context("Failed to load configuration")?;

    info!("Starting jockey-qd on port {}", config.port);
    info!("Data directory: {}", config.data_dir.display());
    info!("Resolver: {}", config.resolver_url);
    info!("Voice gateway: {}", config.gateway_url);

    std::fs::create_dir_all(&config.data_dir).context("Failed to create data directory")?;
    let blacklist = Arc::new(
        Blacklist::load(config.blacklist_path()).context("Failed to load blacklist")?,
    );

    let client = reqwest::Client::builder()
        .build()
        .context("Failed to build HTTP client")?;
    let resolver = Arc::new(HttpResolver::new(client.clone(), config.resolver_url.clone()));
    let gateway = Arc::new(HttpVoiceGateway::new(client, config.gateway_url.clone()));

    let registry = Arc::new(SessionRegistry::new());
    let events = Arc::new(EventBus::new(config.event_capacity));
    let engine = Arc::new(PlaybackEngine::new(
        Arc::clone(&registry),
        resolver,
        gateway,
        Arc::clone(&events),
        Duration::from_secs(config.resolution_timeout_secs),
    ));

    let _sweeper = spawn_idle_sweeper(
        Arc::clone(&registry),
        Duration::from_secs(config.idle_session_timeout_secs),
    );

    let ctx = AppContext {
        engine,
        blacklist,
        stats: Arc::new(BotStats::new()),
        events,
        port: config.port,
    };

    api::run(ctx).await.context("Server error")?;
    Ok(())
}
