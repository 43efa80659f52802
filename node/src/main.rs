use clap::Parser;
use log::info;
use node::{NodeClient, NodeConfig, SnapshotCollector};
use rand::Rng;
use shared::{EventBus, EventKind, FleetEvent};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about = "Fleet node reporting synthetic load to a master", long_about = None)]
struct Args {
    /// Master address to connect to
    #[arg(short = 'm', long, default_value = "127.0.0.1:3000")]
    master: String,

    /// Unique name of this node
    #[arg(short = 'n', long)]
    name: String,

    /// Shared secret key
    #[arg(short = 's', long)]
    secret: String,

    /// Advertised player capacity
    #[arg(long, default_value = "100")]
    max_players: u32,

    /// Category published as the node's game type
    #[arg(short = 'g', long)]
    game_type: Option<String>,

    /// Heartbeat interval in milliseconds
    #[arg(long, default_value_t = shared::HEARTBEAT_INTERVAL_MS)]
    heartbeat_interval_ms: u64,

    /// Snapshot interval in milliseconds
    #[arg(long, default_value_t = shared::SNAPSHOT_INTERVAL_MS)]
    snapshot_interval_ms: u64,

    /// Metrics report interval in milliseconds
    #[arg(long, default_value_t = shared::METRICS_INTERVAL_MS)]
    metrics_interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = NodeConfig {
        heartbeat_interval_ms: args.heartbeat_interval_ms,
        snapshot_interval_ms: args.snapshot_interval_ms,
        metrics_interval_ms: args.metrics_interval_ms,
        ..NodeConfig::new(args.master, args.name, args.secret)
    };

    // Synthetic load: a random walk over the player count
    let max_players = args.max_players;
    let online = Arc::new(AtomicU32::new(max_players / 4));
    let walker = Arc::clone(&online);
    let collector = SnapshotCollector::new(
        move || {
            let step: i64 = rand::thread_rng().gen_range(-2..=2);
            let current = i64::from(walker.load(Ordering::Relaxed));
            let next = (current + step).clamp(0, i64::from(max_players)) as u32;
            walker.store(next, Ordering::Relaxed);
            next
        },
        move || max_players,
        || rand::thread_rng().gen_range(18.5..=20.0),
    );
    if let Some(game_type) = args.game_type {
        collector.set_extra_data(shared::GAME_TYPE_KEY, game_type);
    }

    let events = EventBus::new();
    events.subscribe(EventKind::NetworkStateChanged, |event| {
        if let FleetEvent::NetworkStateChanged {
            global_online,
            server_count,
            version,
            ..
        } = event
        {
            info!(
                "Network state v{}: {} players on {} servers",
                version, global_online, server_count
            );
        }
    });

    let client = NodeClient::new(config, events, collector)?;
    client.start()?;

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down gracefully...");
    client.shutdown().await;

    Ok(())
}
