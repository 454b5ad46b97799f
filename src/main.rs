// src/main.rs

//! A small runner that connects the configured nodes and logs every event they emit.

use anyhow::Result;
use lavalink_cluster::config::ClientConfig;
use lavalink_cluster::core::events::ClientEvent;
use lavalink_cluster::LavalinkClient;
use std::env;
use tracing::{error, info, warn};
use tracing_subscriber::filter::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    run_app().await
}

async fn run_app() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("lavalink-cluster version {VERSION}");
        return Ok(());
    }

    // It can be provided via a --config flag; otherwise, it defaults to "lavalink.toml".
    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or("lavalink.toml");

    let config = match ClientConfig::from_file(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from \"{config_path}\": {e:#}");
            std::process::exit(1);
        }
    };

    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .compact()
        .with_ansi(true)
        .init();

    info!(
        "Starting lavalink-cluster {VERSION} with {} node(s)...",
        config.nodes.len()
    );

    let client = match LavalinkClient::connect(config) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to register nodes: {}", e);
            return Err(e.into());
        }
    };

    let _subscription = client.subscribe_fn(|event| {
        log_event(&event);
        Ok(())
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received.");
    client.shutdown();
    Ok(())
}

fn log_event(event: &ClientEvent) {
    let node = event.node().name();
    match event {
        ClientEvent::Ready { session_id, resumed, .. } => {
            info!(node, session_id = %session_id, resumed, "Node ready.");
        }
        ClientEvent::Stats { stats, .. } => {
            info!(
                node,
                players = stats.players,
                playing = stats.playing_players,
                system_load = stats.cpu.system_load,
                "Stats received."
            );
        }
        ClientEvent::TrackStart { guild_id, track, .. } => {
            info!(node, guild_id, title = %track.info.title, "Track started.");
        }
        ClientEvent::TrackEnd { guild_id, reason, .. } => {
            info!(node, guild_id, ?reason, "Track ended.");
        }
        ClientEvent::TrackException { guild_id, exception, .. } => {
            warn!(node, guild_id, severity = %exception.severity, "Track exception: {}", exception.cause);
        }
        ClientEvent::ConnectionClosed { guild_id, code, reason, .. } => {
            warn!(node, ?guild_id, code, "Connection closed: {reason}");
        }
        ClientEvent::NodeUnavailable { reason, .. } => warn!(node, "Node unavailable: {reason}"),
        ClientEvent::LinkReassigned { guild_id, previous, .. } => {
            info!(node, guild_id, previous = %previous, "Link reassigned.");
        }
        ClientEvent::LinkOrphaned { guild_id, .. } => warn!(node, guild_id, "Link orphaned."),
        other => info!(node, kind = other.kind(), guild_id = ?other.guild_id(), "Event."),
    }
}
